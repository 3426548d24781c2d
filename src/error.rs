use thiserror::Error;

/// The abstract error kinds of spec.md §7.
///
/// `Fault` and `InvalidArgument` (on malformed command framing) and
/// `NoMemory` (while parsing the command stream) are fatal to the whole
/// `write_commands`/`read_commands` call. `FailedReply` and `DeadReply` are
/// per-command: they are stashed on the issuing worker's `last_error` and
/// the batch continues. `NoSpace` is not really an error — it means the
/// read loop produced a partial result and should be retried with a bigger
/// buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderError {
    /// Copying to/from a user-supplied buffer failed, or the command stream
    /// was truncated mid-payload.
    #[error("user buffer copy failed")]
    Fault,
    /// The command stream contained an opcode or size that could not be
    /// parsed.
    #[error("malformed command or size")]
    InvalidArgument,
    /// A message or registry entry could not be allocated.
    #[error("allocation failed")]
    NoMemory,
    /// The target queue of a transaction or reply no longer exists.
    #[error("target is unreachable")]
    DeadReply,
    /// The caller violated the protocol: no such object, wrong looper
    /// state, or an empty reply stack.
    #[error("protocol violation by caller")]
    FailedReply,
    /// The read buffer was too small for the next message; not fatal, just
    /// retryable with a larger buffer.
    #[error("read buffer too small")]
    NoSpace,
    /// A context manager is already bound.
    #[error("context manager already bound")]
    Busy,
    /// The context manager is bound by a different euid than the caller.
    #[error("context manager bound by a different euid")]
    PermissionDenied,
}

impl BinderError {
    /// True for the three kinds that must abort the whole batch rather than
    /// being recorded as a per-command `last_error`.
    pub fn is_fatal_to_batch(self) -> bool {
        matches!(self, BinderError::Fault | BinderError::InvalidArgument | BinderError::NoMemory)
    }
}

pub type Result<T> = std::result::Result<T, BinderError>;
