use serde::{Deserialize, Serialize};

/// These are the request "commands" that a key-value storage device understands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// store a key/value pair on the device
    Put {
        /// the key to store under
        key: String,
        /// the value to store
        value: String,
    },
    /// get the value associated with a key
    Get {
        /// the key to look up
        key: String,
    },
    /// delete a key/value pair from the device
    Delete {
        /// the key to delete
        key: String,
    },
    /// list the keys in an inclusive key range
    GetKeyRange {
        /// first key of the range
        start: String,
        /// last key of the range
        end: String,
        /// maximum number of keys to return
        max: usize,
    },
    /// a no-op round trip, useful as a connection health check
    Noop,
}

/// The response types a device can return for any [`Request`]
///
/// [`Request`]: ./enum.Request.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// the request succeeded; GETs carry the value found (or `None`)
    Ok(Option<String>),
    /// a successful key range listing
    Keys(Vec<String>),
    /// the device could not service the request
    Err(String),
}

/// A [`Request`] tagged with the sequence number that will correlate its
/// response. Responses come back on a shared connection in whatever order
/// the device finishes them.
///
/// [`Request`]: ./enum.Request.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// sequence number, unique per connection
    pub seq: u64,
    /// the operation to perform
    pub req: Request,
}

/// A [`Response`] tagged with the sequence number of the request it answers
///
/// [`Response`]: ./enum.Response.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// sequence number copied from the request
    pub seq: u64,
    /// the outcome of the request
    pub resp: Response,
}
