use thiserror::Error;

/// Everything that can go wrong while reading a class file or rebuilding a method body.
///
/// Only [`DecompileError::ClassFormat`] aborts a whole read. The other variants are
/// recorded as diagnostics on the member they occurred in and processing continues.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecompileError {
    #[error("invalid class file: {message}")]
    ClassFormat { message: String },

    #[error("bad constant pool reference #{index}")]
    ConstantPool { index: u16 },

    #[error("malformed bytecode at offset {offset}: {reason}")]
    MalformedBytecode { offset: u32, reason: String },

    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: u32 },

    #[error("local slot {slot} at offset {offset} has no binding")]
    UnresolvedSlot { offset: u32, slot: u16 },

    #[error("could not structure control flow at offset {offset}")]
    UnstructurableControlFlow { offset: u32 },
}

impl DecompileError {
    /// Returns true for the errors that leave the rest of the member usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecompileError::StackUnderflow { .. }
                | DecompileError::UnresolvedSlot { .. }
                | DecompileError::UnstructurableControlFlow { .. }
        )
    }
}

impl From<binrw::Error> for DecompileError {
    fn from(err: binrw::Error) -> Self {
        DecompileError::ClassFormat {
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = DecompileError> = std::result::Result<T, E>;
