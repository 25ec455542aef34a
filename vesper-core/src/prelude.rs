//! # Prelude
//!
//! Commonly used types from the Vesper core library.

pub use crate::{
    channel::{Bindings, ChannelId, ChannelKind},
    config::{AckConfig, ClusterConfig, ConfigLoader, LoggingConfig, VesperConfig},
    error::{Error, Result},
    message::{Message, MessageBuilder},
    types::{ListenerId, MessageId, SessionId},
};

pub use serde::{Deserialize, Serialize};
pub use serde_json::{json, Value};
