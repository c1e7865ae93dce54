use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`KvcError`]
pub type Result<T> = std::result::Result<T, KvcError>;

/// The error variants returned by the client and by [`TaskPool`] construction.
/// Lower level errors from third party crates are wrapped rather than leaked.
///
/// [`TaskPool`]: ../thread_pool/struct.TaskPool.html
#[derive(Debug, Error)]
pub enum KvcError {
    /// variant for errors caused by socket IO
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// variant for errors while encoding or decoding protocol frames
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// variant for invalid user supplied input, e.g. an address that is not IP:PORT
    #[error("{0}")]
    Parsing(String),

    /// variant for an invalid [`TaskPoolConfig`]
    ///
    /// [`TaskPoolConfig`]: ../thread_pool/struct.TaskPoolConfig.html
    #[error("invalid configuration: {0}")]
    Config(String),

    /// the connection to the device was lost, or the client is shutting down
    #[error("connection to the device was lost")]
    Disconnected,

    /// the device answered a request with an error status
    #[error("device returned an error: {0}")]
    Device(String),
}
