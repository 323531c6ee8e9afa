//! Reader/writer locks over named resources, held by remote connections.
//!
//! A singleton [`Coordinator`] actor owns every resource's holder set and
//! waiter queue. A grant is a [`LockSession`] child actor bound to one
//! connection; the lock is released exactly when that session exits, which
//! happens when the connection closes or the grant is evicted.
//!
//! Admission is strict FIFO. A queued writer blocks readers that arrive after
//! it, and a release admits either one writer or the whole run of consecutive
//! readers at the head of the queue. Closing the connection is the only way to
//! leave the queue.

mod connection;
mod coordinator;
mod session;

pub use connection::LockConnection;
pub use coordinator::{
    Coordinator, CoordinatorMessage, LockEntry, LockRequest, LockSnapshot, COORDINATOR_NAME,
};
pub use session::{LockSession, SessionMessage};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Error, Result};

/// Access mode of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

impl LockMode {
    /// Parse the `read_lock` query flag: `true` (any case) is a read lock,
    /// `false` (any case) a write lock; anything else is rejected.
    pub fn from_read_lock(value: Option<&str>) -> Result<Self> {
        match value {
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(LockMode::Read),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(LockMode::Write),
            Some(v) => Err(Error::bad_request(format!(
                "read_lock must be true or false, got {:?}",
                v
            ))),
            None => Err(Error::bad_request("read_lock query parameter is required")),
        }
    }

    pub fn compatible_with(self, holders: impl IntoIterator<Item = LockMode>) -> bool {
        let mut holders = holders.into_iter().peekable();
        match self {
            LockMode::Write => holders.peek().is_none(),
            LockMode::Read => holders.all(|m| m == LockMode::Read),
        }
    }
}
