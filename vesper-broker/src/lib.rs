//! # Vesper Broker
//!
//! Session handling, channel routing and acknowledged delivery for the Vesper
//! publish/subscribe bus.
//!
//! This crate provides:
//! - [`BatchQueue`](ext::BatchQueue), a growable circular buffer whose
//!   elements carry batch numbers
//! - the acknowledged delivery extension built on it, which resends
//!   unacknowledged messages after a lost connect response
//! - [`ChannelRouter`], routing publishes through channel wildcards and
//!   dispatching template listeners and remote calls
//! - [`Broker`], a facade running handshake, connect, subscribe, publish and
//!   disconnect over decoded messages
//!
//! ## Examples
//!
//! ```rust
//! use vesper_broker::{meta, Broker, BrokerConfig};
//! use vesper_core::{ChannelId, Message};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::new(BrokerConfig::default());
//! let reply = broker.handshake(Message::builder(meta::HANDSHAKE)?.ext("ack", true).build())?;
//! let session = reply.client_id.clone().expect("handshake assigns a session");
//!
//! broker.subscribe(&session, &ChannelId::parse("/chat/*")?)?;
//! broker.publish(Message::builder("/chat/lobby")?.data("hello").build())?;
//!
//! let connect = Message::builder(meta::CONNECT)?.id("1").client_id(session).build();
//! let response = broker.connect(connect)?;
//! assert_eq!(response.messages.len(), 1);
//! assert_eq!(response.reply.ext_value("ack"), Some(&1.into()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod error;
pub mod ext;
pub mod routing;
pub mod session;

pub use broker::{Broker, ConnectResponse, PublishOutcome};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use routing::{ChannelListener, ChannelRouter, ListenerId, RemoteCallHandler};
pub use session::ServerSession;

/// Meta channel names.
pub mod meta {
    /// Session creation
    pub const HANDSHAKE: &str = "/meta/handshake";
    /// Message polling
    pub const CONNECT: &str = "/meta/connect";
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ext::{AckState, EnqueueOutcome, QueueMaxedListener},
        Broker, BrokerConfig, ChannelRouter, ConnectResponse, ServerSession,
    };
    pub use vesper_core::prelude::*;
}
