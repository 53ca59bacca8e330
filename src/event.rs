//! Receipt notification parsing and validation.
//!
//! The relay is triggered by a mail-receipt notification: a JSON payload
//! with a single record describing the stored message and its envelope
//! recipients. Anything that does not match that shape is rejected
//! before any collaborator is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Event source tag a record must carry.
pub const EVENT_SOURCE: &str = "aws:ses";

/// Event schema version a record must carry.
pub const EVENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptNotification {
    #[serde(rename = "Records")]
    pub records: Vec<ReceiptRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    #[serde(rename = "eventSource")]
    pub event_source: String,
    #[serde(rename = "eventVersion")]
    pub event_version: String,
    pub ses: SesPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesPayload {
    pub mail: MailMetadata,
    pub receipt: Receipt,
}

/// Metadata of the received message as reported by the receiving service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMetadata {
    /// Unique message identifier; doubles as the storage key suffix.
    pub message_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Envelope sender as seen by the receiving service.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Envelope recipients the receiving service accepted the message for.
    pub recipients: Vec<String>,
}

/// Validate a trigger payload and extract the message metadata plus the
/// envelope recipient list.
///
/// Accepts exactly one record with the expected source and version tags;
/// unknown extra fields anywhere in the payload are ignored.
pub fn parse_receipt_event(
    event: &serde_json::Value,
) -> Result<(MailMetadata, Vec<String>), RelayError> {
    let invalid = |reason: String| RelayError::InvalidEvent {
        reason,
        event: event.to_string(),
    };

    let notification: ReceiptNotification =
        serde_json::from_value(event.clone()).map_err(|e| invalid(e.to_string()))?;

    if notification.records.len() != 1 {
        return Err(invalid(format!(
            "expected exactly one record, got {}",
            notification.records.len()
        )));
    }
    // Length checked above.
    let Some(record) = notification.records.into_iter().next() else {
        return Err(invalid("expected exactly one record, got 0".to_string()));
    };

    if record.event_source != EVENT_SOURCE {
        return Err(invalid(format!(
            "unexpected event source {:?}",
            record.event_source
        )));
    }
    if record.event_version != EVENT_VERSION {
        return Err(invalid(format!(
            "unsupported event version {:?}",
            record.event_version
        )));
    }

    Ok((record.ses.mail, record.ses.receipt.recipients))
}
