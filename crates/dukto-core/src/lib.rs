//! # Dukto Core Library
//!
//! `dukto-core` implements the Dukto LAN protocol engine: peer discovery over
//! UDP broadcast and streaming of files, directories or text over TCP.
//!
//! ## Features
//!
//! - **Zero-configuration discovery**: peers announce themselves with a
//!   one-byte-tagged datagram carrying a human-readable signature
//! - **Loop suppression**: interfaces that echo our own broadcasts are detected
//!   and ignored
//! - **Streaming transfers**: one TCP connection carries an ordered list of
//!   directories and files (or a text blob) without per-chunk framing
//! - **Collision-safe receiving**: existing files and directories are never
//!   overwritten; colliding top-level entries get numbered names
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - Address parsing for outbound transfers
//! - [`discovery`] - Peer directory over UDP broadcast
//! - [`mod@file`] - Storage backends and entry enumeration
//! - [`platform`] - Local identity and discovery signature
//! - [`protocol`] - Discovery datagram codec and transfer stream primitives
//! - [`session`] - Session coordinator tying discovery and transfers together
//! - [`transfer`] - Sender and receiver state machines
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dukto_core::{config::Config, file::LocalFileStore, platform::Identity};
//! use dukto_core::session::SessionCoordinator;
//!
//! let config = Config::load()?;
//! let (coordinator, handle, mut events) = SessionCoordinator::bind(
//!     config.protocol_options()?,
//!     Identity::detect(),
//!     Arc::new(LocalFileStore::new()),
//! )
//! .await?;
//! tokio::spawn(coordinator.run());
//!
//! handle.send_text("192.168.1.20".parse()?, 0, "hello").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod file;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port for both discovery (UDP) and transfers (TCP)
pub const DEFAULT_PORT: u16 = 4644;

/// Largest unit of element payload moved per read or write (1 MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default interval between periodic presence broadcasts, in seconds
pub const DEFAULT_HELLO_INTERVAL_SECS: u64 = 60;

/// Default time a transfer may go without forward progress, in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default outbound connect timeout, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
