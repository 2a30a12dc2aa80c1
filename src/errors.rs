// errors.rs - host-visible fault plane of the virtual machine.
//
// Forth-level errors (unknown word, stack underflow caught by ?STACK,
// abort") are handled inside the image by CATCH/THROW and never surface
// here. Everything in this enum stops the interpreter loop.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// A cell or byte access landed outside the image.
    #[error("memory access out of range: {0:#06x}")]
    OutOfRange(u16),

    /// The cell at WP held a value that is not a registered opcode.
    #[error("unknown opcode {opcode:#06x} at {wp:#06x}")]
    UnknownOpcode { opcode: u16, wp: u16 },

    /// A word name could not be resolved to a code address.
    #[error("undefined word \"{0}\"")]
    Undefined(String),

    /// The name dictionary grew down into the code dictionary.
    #[error("name dictionary overflow at {0:#06x}")]
    NameOverflow(u16),

    /// A malformed host-side colon definition was handed to `add_word`.
    #[error("malformed definition: {0}")]
    BadDefinition(String),

    /// The byte sink failed.
    #[error("output failure: {0}")]
    Output(String),
}
