/// Failures raised while decoding a pickle stream.
///
/// The virtual machine stops at the first one; nothing decoded so far is
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PickleError {
    /// The byte at the current position is not a known opcode.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// An opcode needed more stack entries (or a mark) than were present.
    #[error("stack underflow")]
    StackUnderflow,

    /// A new frame started before the current one was consumed.
    #[error("beginning of a new frame before end of current frame")]
    FrameBoundary,

    /// The persistent-id payload is not one this loader understands.
    #[error("unsupported persistent id: {0}")]
    UnsupportedPersistentId(String),

    /// Strict class resolution refused a `(module, name)` pair.
    #[error("cannot resolve class {module}.{name}")]
    UnresolvedClass { module: String, name: String },

    /// An operand had the wrong shape for the opcode consuming it.
    #[error("{opcode}: expected {expected}")]
    BadTypeForOpcode {
        opcode: &'static str,
        expected: &'static str,
    },

    /// `GET` of a memo slot that was never `PUT`.
    #[error("memo value not found at index {0}")]
    MemoMiss(u64),

    /// `EXT*` code absent from the extension registry.
    #[error("unregistered extension code {0}")]
    UnknownExtension(i32),

    /// A recognised reconstructor that this decoder refuses to run.
    #[error("{0} is not implemented")]
    NotImplemented(String),

    /// `PROTO` announced a protocol newer than 5.
    #[error("unsupported pickle protocol: {0}")]
    UnsupportedProtocol(u8),

    /// The operand bytes of an opcode could not be decoded.
    #[error("malformed pickle: {0}")]
    Malformed(String),

    /// `NEXT_BUFFER` with no out-of-band buffers left.
    #[error("not enough out-of-band buffers")]
    MissingBuffer,
}

/// All errors that can occur within vole.
///
/// One enum covers the engine boundary, the handle layer, the indexing
/// algebra, checkpoint decoding and the variable store, so that `?` works
/// across every layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Message drained from the engine's per-thread error slot, verbatim.
    #[error("engine error: {0}")]
    Engine(String),

    /// A legacy checkpoint did not start with the expected magic number.
    #[error("invalid magic number in legacy checkpoint")]
    BadMagic,

    /// A legacy checkpoint announced an unexpected protocol version.
    #[error("unsupported checkpoint protocol version {0}")]
    BadProtocol(i64),

    /// The container is recognised but cannot be loaded.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Pickle(#[from] PickleError),

    /// More point/range/gather atoms than the tensor has dimensions.
    #[error("too many indices for tensor of dimension {rank} (got {atoms})")]
    IndexArity { atoms: usize, rank: usize },

    /// A gather index tensor is not a 1-D integer tensor.
    #[error("invalid index tensor: {0}")]
    IndexType(String),

    /// A variable with this name is already in the store.
    #[error("variable {0} already exists")]
    PathExists(String),

    /// The store holds a variable the loaded file does not provide.
    #[error("cannot find {0} in the loaded weights")]
    MissingParameter(String),

    /// The loaded file provides a variable the store does not hold.
    #[error("unexpected parameter {0} in the loaded weights")]
    UnexpectedParameter(String),

    /// Path segments and variable names may not contain `.`.
    #[error("invalid path element {0:?}: names cannot contain '.'")]
    InvalidPath(String),

    /// Checked release of a handle that was already released.
    #[error("handle {0} was already freed")]
    DoubleFree(String),

    /// Use of a handle after it was released.
    #[error("handle {0} has been freed")]
    Released(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
