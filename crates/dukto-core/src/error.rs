//! Error types for Dukto.
//!
//! A single error enum covers discovery, enumeration, transfer and
//! configuration failures. Mid-transfer failures are additionally reported
//! as `Aborted` events carrying the error's display string.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Dukto operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Dukto.
#[derive(Error, Debug)]
pub enum Error {
    /// The UDP discovery port is bound by someone else (E001)
    #[error("the UDP port {0} is already used by another application")]
    UdpPortInUse(u16),

    /// The TCP transfer port is bound by someone else (E002)
    #[error("the TCP port {0} is already used by another application")]
    TcpPortInUse(u16),

    /// A source path cannot be read (E003)
    #[error("cannot read {0}")]
    CannotRead(String),

    /// A destination path cannot be created or written (E004)
    #[error("cannot write {0}")]
    CannotWrite(String),

    /// A transfer is already in progress (E005)
    #[error("another transfer is already in progress")]
    Busy,

    /// The remote side closed the connection before the session completed (E006)
    #[error("connection closed by peer before the transfer completed")]
    ConnectionClosed,

    /// Transfer was aborted locally
    #[error("transfer aborted")]
    TransferAborted,

    /// Invalid or corrupt transfer stream
    #[error("invalid protocol data: {0}")]
    ProtocolError(String),

    /// Invalid user-supplied input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No usable network interface was found
    #[error("no network interface available for broadcast")]
    NoNetwork,

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The coordinator is no longer running
    #[error("session coordinator has shut down")]
    CoordinatorClosed,

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::UdpPortInUse(_) => Some("E001"),
            Self::TcpPortInUse(_) => Some("E002"),
            Self::CannotRead(_) => Some("E003"),
            Self::CannotWrite(_) => Some("E004"),
            Self::Busy => Some("E005"),
            Self::ConnectionClosed => Some("E006"),
            _ => None,
        }
    }

    /// Returns whether this error is transient and the operation may be retried.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy | Self::ConnectionClosed | Self::Timeout(_) | Self::NoNetwork
        )
    }

    /// Maps a bind failure to the port-specific variant when the port is taken.
    pub(crate) fn from_bind(err: io::Error, port: u16, udp: bool) -> Self {
        if err.kind() == io::ErrorKind::AddrInUse {
            if udp {
                Self::UdpPortInUse(port)
            } else {
                Self::TcpPortInUse(port)
            }
        } else {
            Self::Io(err)
        }
    }
}
