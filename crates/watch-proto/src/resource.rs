use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Channel;

/// The parts of Kubernetes object metadata the watch engine relies on.
/// Everything else is preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectMeta {
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_resource_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    /// Identity used to match snapshot entries: the uid when the server
    /// assigned one, the namespaced name otherwise.
    pub fn key(&self) -> ResourceKey {
        match &self.uid {
            Some(uid) => ResourceKey::Uid(uid.clone()),
            None => ResourceKey::Name {
                namespace: self.namespace.clone().unwrap_or_default(),
                name: self.name.clone().unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Uid(String),
    Name { namespace: String, name: String },
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Uid(uid) => write!(f, "uid:{uid}"),
            ResourceKey::Name { namespace, name } => write!(f, "{namespace}/{name}"),
        }
    }
}

/// A resource kind streamed over one watch channel.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const CHANNEL: Channel;
    /// Field name holding the object inside an event notice.
    const FIELD: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn key(&self) -> ResourceKey {
        self.metadata().key()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevWorkspace {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DevWorkspace {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Option<&str> {
        self.status.get("phase").and_then(Value::as_str)
    }
}

impl Resource for DevWorkspace {
    const CHANNEL: Channel = Channel::DevWorkspace;
    const FIELD: &'static str = "devWorkspace";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Pod {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Option<&str> {
        self.status.get("phase").and_then(Value::as_str)
    }
}

impl Resource for Pod {
    const CHANNEL: Channel = Channel::Pod;
    const FIELD: &'static str = "pod";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

/// A core/v1 cluster event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEvent {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub involved_object: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClusterEvent {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }
}

impl Resource for ClusterEvent {
    const CHANNEL: Channel = Channel::Event;
    const FIELD: &'static str = "event";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Kubernetes-style list response returned by the REST endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceList<R> {
    #[serde(default = "Vec::new")]
    pub items: Vec<R>,
    #[serde(default)]
    pub metadata: ListMeta,
}

impl<R> ResourceList<R> {
    pub fn new(items: Vec<R>, resource_version: impl Into<String>) -> Self {
        Self {
            items,
            metadata: ListMeta {
                resource_version: Some(resource_version.into()),
            },
        }
    }
}
