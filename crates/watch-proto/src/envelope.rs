use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Channel, DecodeError};

/// Parameters attached to a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Unsubscribe requests carry an empty params object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeParams {}

/// Frames sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        channel: Channel,
        params: SubscribeParams,
    },
    Unsubscribe {
        channel: Channel,
        #[serde(default)]
        params: UnsubscribeParams,
    },
}

impl ClientFrame {
    pub fn subscribe(channel: Channel, params: SubscribeParams) -> Self {
        ClientFrame::Subscribe { channel, params }
    }

    pub fn unsubscribe(channel: Channel) -> Self {
        ClientFrame::Unsubscribe {
            channel,
            params: UnsubscribeParams::default(),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            ClientFrame::Subscribe { channel, .. } | ClientFrame::Unsubscribe { channel, .. } => {
                *channel
            }
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Inbound `{channel, message}` envelope.
///
/// The channel is kept as a raw string so that envelopes for channels this
/// client does not know about can still be parsed, logged and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub channel: String,
    pub message: Value,
}

impl ServerEnvelope {
    pub fn new(channel: Channel, message: Value) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            message,
        }
    }

    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn channel(&self) -> Result<Channel, DecodeError> {
        self.channel.parse()
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
