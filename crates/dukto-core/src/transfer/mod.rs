//! Transfer engine for Dukto.
//!
//! One TCP connection carries one session in one direction. The
//! [`Sender`] and [`Receiver`] are explicit phase machines: each call to
//! their step function moves at most one unit of work (a header, a name and
//! size record, or up to one chunk of payload). An async driver loop feeds
//! them as the socket becomes readable or writable and reports what happened
//! through [`TransferEvent`]s.
//!
//! ## Limits
//!
//! - Payload moves in units of at most 1 MB in both directions
//! - A read or write that makes no progress for the idle timeout aborts the
//!   session
//! - No acknowledgements, resumption or checksums: the stream is the session

mod receiver;
mod rename;
mod sender;

pub use receiver::{ReceivePhase, Receiver};
pub use rename::{unique_file_name, RenameMap};
pub use sender::{Outgoing, SendPhase, Sender};

use std::path::PathBuf;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Channel end through which a transfer reports progress.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Configure TCP keep-alive on a transfer socket.
///
/// Probing starts after 10 seconds of idle time and repeats every 5 seconds,
/// so a vanished peer is noticed even while the receiver waits for data.
pub(crate) fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    SockRef::from(stream)
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on transfer socket");
    Ok(())
}

/// Something that happened during a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The session header was sent or received
    Started {
        /// Payload bytes announced for the session
        total_bytes: u64,
    },
    /// Cumulative payload progress across the whole session
    Progress {
        /// Payload bytes announced for the session
        total_bytes: u64,
        /// Payload bytes moved so far
        done_bytes: u64,
    },
    /// One element (directory, file or text) was fully moved
    ElementCompleted {
        /// Element name; on receive, after collision renaming
        name: String,
    },
    /// A top-level directory was created
    DirectoryReceived {
        /// Name it was stored under, after collision renaming
        name: String,
        /// Absolute location
        path: PathBuf,
    },
    /// A top-level file was fully written
    FileReceived {
        /// Name it was stored under, after collision renaming
        name: String,
        /// Absolute location
        path: PathBuf,
        /// Size in bytes
        size: u64,
    },
    /// A text element was received
    TextReceived {
        /// The text
        text: String,
    },
    /// Every element was moved; no further events follow
    Completed,
    /// The session ended early; no further events follow
    Aborted {
        /// Reason, suitable for display
        error: String,
    },
}

impl TransferEvent {
    /// Whether this event ends the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

/// Live counters of one direction of one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSession {
    /// Elements announced in the header
    pub total_elements: u64,
    /// Payload bytes announced in the header
    pub total_bytes: u64,
    /// Elements fully moved
    pub elements_done: u64,
    /// Payload bytes moved
    pub bytes_done: u64,
    /// Name of the element in flight
    pub current_element: Option<String>,
    /// Payload bytes left for the element in flight
    pub current_remaining: u64,
}

impl TransferSession {
    /// Whether every announced element was moved.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.total_elements > 0 && self.elements_done == self.total_elements
    }

    /// Payload progress as a percentage.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.is_complete() {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
        }
    }

    fn progress_event(&self) -> TransferEvent {
        TransferEvent::Progress {
            total_bytes: self.total_bytes,
            done_bytes: self.bytes_done,
        }
    }
}

/// Tunables shared by senders and receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Largest payload unit per read or write
    pub chunk_size: usize,
    /// Abort after this long without forward progress
    pub idle_timeout: Duration,
    /// Abort an outbound connect after this long
    pub connect_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            idle_timeout: Duration::from_secs(crate::DEFAULT_IDLE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl TransferOptions {
    /// Chunk size clamped to `1..=1 MB`.
    #[must_use]
    pub fn unit_size(&self) -> usize {
        self.chunk_size.clamp(1, crate::DEFAULT_CHUNK_SIZE)
    }
}

fn emit(events: &EventSender, event: TransferEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Transfer event dropped, no listener");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_percentage() {
        let mut session = TransferSession {
            total_elements: 2,
            total_bytes: 200,
            ..TransferSession::default()
        };
        assert!((session.percentage() - 0.0).abs() < f64::EPSILON);

        session.bytes_done = 50;
        assert!((session.percentage() - 25.0).abs() < f64::EPSILON);

        let empty = TransferSession {
            total_elements: 1,
            elements_done: 1,
            ..TransferSession::default()
        };
        assert!(empty.is_complete());
        assert!((empty.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unit_size_is_bounded() {
        let options = TransferOptions {
            chunk_size: 16 * 1024 * 1024,
            ..TransferOptions::default()
        };
        assert_eq!(options.unit_size(), crate::DEFAULT_CHUNK_SIZE);

        let options = TransferOptions {
            chunk_size: 0,
            ..TransferOptions::default()
        };
        assert_eq!(options.unit_size(), 1);
    }

    #[test]
    fn test_terminal_events() {
        assert!(TransferEvent::Completed.is_terminal());
        assert!(TransferEvent::Aborted {
            error: "x".to_string()
        }
        .is_terminal());
        assert!(!TransferEvent::Started { total_bytes: 0 }.is_terminal());
    }
}
