use thiserror::Error;

pub type Result<T> = std::result::Result<T, GitError>;

/// Everything that can go wrong while fetching and decoding remote objects.
///
/// The variants map one-to-one onto failure classes callers may want to
/// react to: malformed input, integrity violations, missing delta bases,
/// transport trouble, and path navigation errors.
#[derive(Debug, Error)]
pub enum GitError {
    /// A signature, version, framing, or encoding violation in parsed bytes.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// A trailer digest or per-object identifier disagreed with the data.
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// A delta's base object was found neither in the pack nor in any
    /// supplied object store.
    #[error("unresolved delta: base {0} is not available")]
    UnresolvedDelta(String),

    #[error("unsupported version {found} (expected {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },

    /// The pack index would need 64-bit offsets, which this client refuses.
    #[error("pack offsets of 2 GiB or more are not supported")]
    LargeOffsetUnsupported,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server's reply was syntactically valid HTTP but not a valid
    /// upload-pack exchange, or the server reported a fatal error in-band.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unauthorized: server returned HTTP {0}")]
    Unauthorized(u16),

    /// A commit, tree, blob, or path component was not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path traversal reached an entry that is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for GitError {
    /// In-memory reads and writes only fail on truncated input, which is a
    /// format violation here, not an I/O concern.
    fn from(err: std::io::Error) -> Self {
        GitError::BadFormat(format!("unexpected end of input: {err}"))
    }
}

impl GitError {
    pub(crate) fn bad_format(msg: impl Into<String>) -> Self {
        GitError::BadFormat(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        GitError::Protocol(msg.into())
    }
}
