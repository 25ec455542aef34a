//! # Vesper Core
//!
//! Shared building blocks of the Vesper publish/subscribe bus.
//!
//! ## Modules
//!
//! - [`channel`]: channel names, wildcard and template patterns, parameter binding
//! - [`message`]: the bus message envelope
//! - [`config`]: layered TOML and environment configuration
//! - [`telemetry`]: `tracing` subscriber setup
//! - [`error`]: error types and result handling
//! - [`types`]: session and message identifiers
//! - [`prelude`]: common imports

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod prelude;
pub mod telemetry;
pub mod types;

pub use channel::{Bindings, ChannelId, ChannelKind};
pub use error::{Error, Result};
pub use message::{Message, MessageBuilder};
pub use types::{ListenerId, MessageId, SessionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
