//! Notification events and their wire encoding.
//!
//! Events are serialized as internally tagged JSON objects, one per text frame:
//!
//! ```json
//! {"type":"new_request","request_id":42,"teacher":"Jean Baptiste","filename":"essay.pdf","deadline":"2024-06-01 14:00"}
//! {"type":"request_printed","request_id":42,"filename":"essay.pdf"}
//! ```

use serde::{Deserialize, Serialize};

/// The id of a print request in the persistent store.
pub type RequestId = i64;

/// An event raised by the request workflow after a persisted mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A teacher submitted a request. Routed to the secretary group.
    NewRequest {
        request_id: RequestId,
        teacher: String,
        filename: String,
        /// Formatted as `YYYY-MM-DD HH:MM`.
        deadline: String,
    },
    /// A request was marked printed. Routed to the owning teacher's group.
    RequestPrinted {
        request_id: RequestId,
        filename: String,
    },
}

impl NotificationEvent {
    /// The `type` discriminator written on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::NewRequest { .. } => "new_request",
            NotificationEvent::RequestPrinted { .. } => "request_printed",
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            NotificationEvent::NewRequest { request_id, .. }
            | NotificationEvent::RequestPrinted { request_id, .. } => *request_id,
        }
    }

    /// Encodes the event as the JSON text sent to clients.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a wire payload, as received from the relay.
    pub fn from_wire(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Normalizes a deadline to `YYYY-MM-DD HH:MM`, accepting either a space or
/// a `T` between date and time. Returns `None` unless every field is a digit
/// in range and the date exists.
pub fn normalize_deadline(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() != 16 || !matches!(bytes[10], b' ' | b'T') {
        return None;
    }
    if bytes[4] != b'-' || bytes[7] != b'-' || bytes[13] != b':' {
        return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u32> {
        let digits = &bytes[range];
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        Some(digits.iter().fold(0, |n, d| n * 10 + u32::from(d - b'0')))
    };
    let year = field(0..4)?;
    let month = field(5..7)?;
    let day = field(8..10)?;
    let hour = field(11..13)?;
    let minute = field(14..16)?;

    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        _ => return None,
    };
    if day == 0 || day > days_in_month || hour > 23 || minute > 59 {
        return None;
    }

    Some(format!("{}-{:02}-{:02} {:02}:{:02}", &raw[..4], month, day, hour, minute))
}
