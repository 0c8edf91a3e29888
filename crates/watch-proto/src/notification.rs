use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DecodeError, Resource};

const PHASE_FIELD: &str = "eventPhase";
const ERROR_PHASE: &str = "ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventPhase {
    Added,
    Modified,
    Deleted,
}

impl EventPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPhase::Added => "ADDED",
            EventPhase::Modified => "MODIFIED",
            EventPhase::Deleted => "DELETED",
        }
    }

    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "ADDED" => Some(EventPhase::Added),
            "MODIFIED" => Some(EventPhase::Modified),
            "DELETED" => Some(EventPhase::Deleted),
            _ => None,
        }
    }
}

/// Subset of a Kubernetes `Status` object delivered on watch failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Status {
    /// Code the backend uses when the requested resourceVersion is gone.
    pub const EXPIRED: u16 = 410;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_expired(&self) -> bool {
        self.code == Self::EXPIRED
    }
}

/// Subscription parameters echoed back with a status notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource_version: String,
}

/// A decoded channel message.
///
/// On the wire both variants share one object discriminated by `eventPhase`;
/// event notices carry the resource under a kind-specific field name
/// ([`Resource::FIELD`]), status notices use the `ERROR` phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<R> {
    Event {
        phase: EventPhase,
        object: R,
    },
    Status {
        status: Status,
        params: Option<StatusParams>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    event_phase: String,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    params: Option<StatusParams>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl<R: Resource> Notification<R> {
    pub fn added(object: R) -> Self {
        Notification::Event {
            phase: EventPhase::Added,
            object,
        }
    }

    pub fn modified(object: R) -> Self {
        Notification::Event {
            phase: EventPhase::Modified,
            object,
        }
    }

    pub fn deleted(object: R) -> Self {
        Notification::Event {
            phase: EventPhase::Deleted,
            object,
        }
    }

    pub fn status(status: Status) -> Self {
        Notification::Status {
            status,
            params: None,
        }
    }

    /// Short label used in logs.
    pub fn phase_label(&self) -> &'static str {
        match self {
            Notification::Event { phase, .. } => phase.as_str(),
            Notification::Status { .. } => ERROR_PHASE,
        }
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let raw: RawNotification = serde_json::from_value(value)?;
        if raw.event_phase == ERROR_PHASE {
            let status = raw.status.ok_or(DecodeError::MissingField("status"))?;
            return Ok(Notification::Status {
                status,
                params: raw.params,
            });
        }

        let phase = EventPhase::from_wire(&raw.event_phase)
            .ok_or_else(|| DecodeError::UnknownPhase(raw.event_phase.clone()))?;
        let mut rest = raw.rest;
        let object = rest
            .remove(R::FIELD)
            .ok_or(DecodeError::MissingField(R::FIELD))?;
        Ok(Notification::Event {
            phase,
            object: serde_json::from_value(object)?,
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut map = Map::new();
        match self {
            Notification::Event { phase, object } => {
                map.insert(PHASE_FIELD.into(), Value::from(phase.as_str()));
                map.insert(R::FIELD.into(), serde_json::to_value(object)?);
            }
            Notification::Status { status, params } => {
                map.insert(PHASE_FIELD.into(), Value::from(ERROR_PHASE));
                map.insert("status".into(), serde_json::to_value(status)?);
                if let Some(params) = params {
                    map.insert("params".into(), serde_json::to_value(params)?);
                }
            }
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DevWorkspace, Pod};
    use serde_json::json;

    #[test]
    fn decodes_workspace_event() {
        let message = json!({
            "eventPhase": "MODIFIED",
            "devWorkspace": {
                "metadata": {"name": "wksp", "namespace": "ns", "uid": "u-1", "resourceVersion": "12"},
                "status": {"phase": "Running"}
            }
        });
        match Notification::<DevWorkspace>::from_value(message).expect("decodes") {
            Notification::Event { phase, object } => {
                assert_eq!(phase, EventPhase::Modified);
                assert_eq!(object.metadata.resource_version.as_deref(), Some("12"));
                assert_eq!(object.phase(), Some("Running"));
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn decodes_status_notice_with_params() {
        let message = json!({
            "eventPhase": "ERROR",
            "status": {"code": 410, "message": "too old resource version"},
            "params": {"namespace": "ns", "resourceVersion": "3"}
        });
        match Notification::<Pod>::from_value(message).expect("decodes") {
            Notification::Status { status, params } => {
                assert!(status.is_expired());
                assert!(!status.is_success());
                assert_eq!(params.unwrap().resource_version, "3");
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn event_for_another_kind_is_missing_its_field() {
        let message = json!({"eventPhase": "ADDED", "pod": {"metadata": {"uid": "p"}}});
        let err = Notification::<DevWorkspace>::from_value(message).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("devWorkspace")));
    }

    #[test]
    fn rejects_unknown_phase_and_bare_error() {
        let err = Notification::<Pod>::from_value(json!({"eventPhase": "BOOKMARK"})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownPhase(_)));
        let err = Notification::<Pod>::from_value(json!({"eventPhase": "ERROR"})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("status")));
    }

    #[test]
    fn encodes_in_wire_shape() {
        let notice = Notification::<Pod>::status(Status::new(410, "gone"));
        assert_eq!(
            notice.to_value().unwrap(),
            json!({"eventPhase": "ERROR", "status": {"code": 410, "message": "gone"}})
        );
    }
}
