//! Decoded channel messages.
//!
//! Wire framing and codecs live in the transport; by the time anything
//! reaches this crate it is one of these records.

use crate::error::{Result, SyncError};
use rso_core::{ObjectId, ObjectOperation, Timeserial};
use serde::{Deserialize, Serialize};

/// One operation message as delivered over the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessage {
    pub object_id: ObjectId,
    pub operation: ObjectOperation,
    /// Origin timeserial; absent on locally-built messages until the
    /// publish acknowledgment assigns one.
    pub serial: Option<Timeserial>,
    /// Origin site; absent on locally-built messages.
    pub site_code: Option<String>,
    /// Server timestamp of the enclosing protocol message, when known.
    pub server_timestamp: Option<u64>,
}

impl ObjectMessage {
    pub fn new(object_id: ObjectId, operation: ObjectOperation) -> Self {
        Self {
            object_id,
            operation,
            serial: None,
            site_code: None,
            server_timestamp: None,
        }
    }

    /// Approximate encoded size, used to enforce the maximum publish
    /// size before handing messages to the transport.
    pub fn size_hint(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Position within one sync sequence: `"{sequenceId}:{cursor}"`, where an
/// empty cursor marks the final page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    pub sequence_id: String,
    pub cursor: Option<String>,
}

impl SyncCursor {
    pub fn parse(input: &str) -> Result<Self> {
        let (sequence_id, cursor) = input
            .split_once(':')
            .ok_or_else(|| SyncError::InvalidCursor(input.to_string()))?;
        if sequence_id.is_empty() {
            return Err(SyncError::InvalidCursor(input.to_string()));
        }
        Ok(Self {
            sequence_id: sequence_id.to_string(),
            cursor: (!cursor.is_empty()).then(|| cursor.to_string()),
        })
    }

    /// True on the last page of a sequence.
    pub fn is_final(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Result of a successful publish.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishAck {
    /// The site code the channel assigned to this client's writes.
    pub origin_site: String,
    /// Per-operation serials, index-aligned with the published messages.
    /// `None` at an index means "do not apply locally".
    pub serials: Vec<Option<Timeserial>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_parse_pages() {
        let page = SyncCursor::parse("seq1:next").unwrap();
        assert_eq!(page.sequence_id, "seq1");
        assert_eq!(page.cursor.as_deref(), Some("next"));
        assert!(!page.is_final());

        let last = SyncCursor::parse("seq1:").unwrap();
        assert!(last.is_final());
    }

    #[test]
    fn test_cursor_rejects_malformed() {
        assert!(SyncCursor::parse("").is_err());
        assert!(SyncCursor::parse("no-colon").is_err());
        assert!(SyncCursor::parse(":cursor").is_err());
    }

    #[test]
    fn test_message_size_hint_grows_with_payload() {
        let id = ObjectId::root();
        let small = ObjectMessage::new(
            id.clone(),
            ObjectOperation::MapSet {
                key: "k".into(),
                value: "v".into(),
            },
        );
        let large = ObjectMessage::new(
            id,
            ObjectOperation::MapSet {
                key: "k".into(),
                value: "v".repeat(1024).into(),
            },
        );
        assert!(large.size_hint() > small.size_hint());
    }
}
