//! Storage-change notifications
//!
//! Push deliveries wrap the changed object's `{bucket, name}` as base64 JSON:
//!
//! ```text
//! {"message": {"data": "<base64 {bucket, name, ...}>",
//!              "attributes": {"bucketId": "..", "objectId": ".."}},
//!  "subscription": ".."}
//! ```
//!
//! An unwrapped `{bucket, name}` body is accepted as well.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectNotification {
    #[serde(default)]
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification body is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notification data is not base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("notification does not name an object")]
    MissingObjectName,
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attributes: Option<PushAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushAttributes {
    bucket_id: Option<String>,
    object_id: Option<String>,
}

/// Decode a push delivery body into the changed object
pub fn decode_push(body: &[u8]) -> Result<ObjectNotification, NotificationError> {
    let value: Value = serde_json::from_slice(body)?;

    if value.get("message").is_none() {
        let direct: ObjectNotification = serde_json::from_value(value)?;
        return non_empty(direct);
    }

    let envelope: PushEnvelope = serde_json::from_value(value)?;
    let message = envelope.message;

    let decoded = match message.data.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(data) => {
            let bytes = STANDARD.decode(data)?;
            serde_json::from_slice::<ObjectNotification>(&bytes).ok()
        }
        None => None,
    };

    if let Some(notification) = decoded.filter(|n| !n.name.is_empty()) {
        return Ok(notification);
    }

    match message.attributes {
        Some(PushAttributes {
            bucket_id,
            object_id: Some(name),
        }) if !name.is_empty() => Ok(ObjectNotification {
            bucket: bucket_id.unwrap_or_default(),
            name,
        }),
        _ => Err(NotificationError::MissingObjectName),
    }
}

fn non_empty(n: ObjectNotification) -> Result<ObjectNotification, NotificationError> {
    if n.name.trim().is_empty() {
        Err(NotificationError::MissingObjectName)
    } else {
        Ok(n)
    }
}
