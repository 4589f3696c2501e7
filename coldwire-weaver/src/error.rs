use std::io;
use thiserror::Error;

/// Errors related to reading and writing class artifacts.
#[derive(Error, Debug)]
pub enum ClassFileError {
    #[error("Bad magic number: {0:#010x}")]
    BadMagic(u32),
    #[error("Unsupported class file version: {0}")]
    UnsupportedVersion(u16),
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
    #[error("Truncated class file")]
    Truncated,
    #[error("Invalid UTF-8 in class file")]
    InvalidUtf8,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by the operand-stack verifier before emission.
#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum VerifyError {
    #[error("Invalid type descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Operand stack underflow at instruction {at}")]
    StackUnderflow { at: usize },
    #[error("Type mismatch at instruction {at}: expected {expected}, found {found}")]
    TypeMismatch {
        at: usize,
        expected: String,
        found: String,
    },
    #[error("Method does not end with a return instruction")]
    MissingReturn,
    #[error("Unreachable code after return at instruction {at}")]
    CodeAfterReturn { at: usize },
    #[error("Operands left on stack at return: {depth}")]
    ResidualStack { depth: usize },
    #[error("Argument index {index} out of range for descriptor {descriptor}")]
    ArgOutOfRange { index: u16, descriptor: String },
    #[error("'this' loaded in static method")]
    ThisInStaticMethod,
}
