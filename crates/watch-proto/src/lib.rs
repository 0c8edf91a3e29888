//! Wire shapes shared by the dashboard watch client and its test servers.
//!
//! The dashboard backend multiplexes change streams for several resource kinds
//! over one websocket. Outbound frames are [`ClientFrame`]s, inbound frames are
//! [`ServerEnvelope`]s whose `message` decodes into a [`Notification`] for the
//! resource kind bound to the envelope's [`Channel`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod envelope;
mod notification;
mod resource;
mod version;

pub use envelope::{ClientFrame, ServerEnvelope, SubscribeParams, UnsubscribeParams};
pub use notification::{EventPhase, Notification, Status, StatusParams};
pub use resource::{
    ClusterEvent, DevWorkspace, ListMeta, ObjectMeta, Pod, Resource, ResourceKey, ResourceList,
};
pub use version::parse_resource_version;

/// Live event stream for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "devWorkspace")]
    DevWorkspace,
    #[serde(rename = "pod")]
    Pod,
    #[serde(rename = "event")]
    Event,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::DevWorkspace, Channel::Pod, Channel::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::DevWorkspace => "devWorkspace",
            Channel::Pod => "pod",
            Channel::Event => "event",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == value)
            .ok_or_else(|| DecodeError::UnknownChannel(value.to_string()))
    }
}

/// Errors raised while decoding inbound frames.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error("unknown event phase {0:?}")]
    UnknownPhase(String),
    #[error("message missing `{0}`")]
    MissingField(&'static str),
}
