//! Rotation notifications carried in queue message bodies
//!
//! Bodies are EventBridge envelopes around CloudTrail records:
//! `{"detail": {"eventName": "...", "requestParameters": {"secretId": "..."}}}`.

use serde::Deserialize;

use crate::{Error, Result};

/// Event names that denote a change of the secret value
pub const VALUE_CHANGE_EVENTS: &[&str] = &["PutSecretValue"];

#[derive(Deserialize)]
struct Envelope {
    detail: Detail,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Detail {
    event_name: String,
    #[serde(default)]
    request_parameters: Option<RequestParameters>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestParameters {
    #[serde(default)]
    secret_id: Option<String>,
}

/// A decoded rotation notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub secret_id: String,
    pub event_name: String,
}

impl RotationEvent {
    /// Decodes a queue message body
    ///
    /// Value-change events must name the secret; other events may omit it.
    pub fn decode(body: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(body).map_err(Error::Decode)?;
        let Detail {
            event_name,
            request_parameters,
        } = envelope.detail;

        let secret_id = request_parameters.and_then(|p| p.secret_id);

        let secret_id = match secret_id {
            Some(id) => id,
            None if VALUE_CHANGE_EVENTS.contains(&event_name.as_str()) => {
                return Err(Error::Decode(serde::de::Error::missing_field(
                    "detail.requestParameters.secretId",
                )));
            }
            None => String::new(),
        };

        Ok(Self {
            secret_id,
            event_name,
        })
    }

    /// Whether this event should trigger a redeploy
    pub fn is_value_change(&self) -> bool {
        VALUE_CHANGE_EVENTS.contains(&self.event_name.as_str())
    }
}
