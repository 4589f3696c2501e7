//! Container generation and runtime for the Coldwire compile-time
//! dependency-injection toolchain.
//!
//! The [codegen] module is the back end of the pipeline: it turns discovered
//! component metadata into a verified [codegen::program::ContainerProgram]
//! with topologically ordered singleton construction, baked hash-table type
//! lookup and prototype construction plans. The [container] module executes
//! such a program against a [bindings::BindingRegistry] of pre-bound
//! constructors and accessors, giving reflection-free injection with
//! non-blocking, cache-accelerated lookups.
//!
//! Runtime services wired into components live in [value] (configuration
//! property resolution for `${name}` expressions) and [event] (event
//! subscriber registration).

pub mod bindings;
pub mod codegen;
pub mod container;
mod error;
pub mod event;
pub mod value;

pub use error::{ContainerError, ErrorPtr, GenerationError};
