//! Post-compilation weaving stage of the Coldwire toolchain.
//!
//! Compiled class artifacts are stored in a compact binary format
//! ([classfile]) whose method bodies are sequences of typed instructions
//! ([ir]). The [weaver] scans artifacts for injectable private fields and
//! synthesizes public setter methods with a fixed naming convention, so the
//! generated container can inject private state without any reflection
//! fallback. All emitted method bodies pass an operand-stack verifier before
//! bytes are written.

pub mod classfile;
mod error;
pub mod ir;
pub mod weaver;

pub use error::{ClassFileError, VerifyError};
