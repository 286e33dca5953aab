//! Registry error types

use thiserror::Error;

use super::entry::ConnectionId;

/// Failure to deliver one message to one connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Connection is not (or no longer) registered
    #[error("connection {0} not registered")]
    NotRegistered(ConnectionId),

    /// The connection's writer has gone away
    #[error("connection {0} closed")]
    Closed(ConnectionId),

    /// The connection did not accept the message within the send timeout
    #[error("send to connection {0} timed out")]
    TimedOut(ConnectionId),
}
