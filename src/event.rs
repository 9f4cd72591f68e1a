use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status reported by the telephony provider for one call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Answered,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "initiated" => Some(Self::Initiated),
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "answered" => Some(Self::Answered),
            "completed" => Some(Self::Completed),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::NoAnswer | Self::Failed | Self::Canceled
        )
    }

    /// Statuses that make the recording reconciler run. This is a fallback
    /// path behind the dial-verb recording, so it fires once audio can
    /// exist on the call.
    pub fn is_recordable(&self) -> bool {
        matches!(self, Self::Answered | Self::InProgress | Self::Completed)
    }
}

/// A status callback payload normalized into typed fields.
///
/// The provider delivers these as either form-encoded or JSON bodies, with
/// field presence varying by call flow. Everything is optional past the
/// call sid; absent fields default rather than fail.
#[derive(Debug, Clone, Default)]
pub struct StatusEvent {
    pub call_sid: String,
    pub status: Option<CallStatus>,
    pub to: String,
    pub from: String,
    pub direction: Option<String>,
    pub duration_secs: Option<u64>,
    pub recording_url: Option<String>,
    /// Child leg created by a dial bridge, when the provider tells us.
    pub dial_child_sid: Option<String>,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
}

impl StatusEvent {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let get_opt = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

        // Duration arrives under either name depending on which leg reports.
        let duration_secs = get_opt("Duration")
            .or_else(|| get_opt("CallDuration"))
            .and_then(|v| v.parse::<u64>().ok());

        let dial_child_sid = get_opt("DialCallSid")
            .or_else(|| get_opt("DialCallSid0"))
            .or_else(|| get_opt("DialSid"));

        Self {
            call_sid: get("CallSid"),
            status: fields
                .get("CallStatus")
                .and_then(|v| CallStatus::parse(v)),
            to: get("To"),
            from: get("From"),
            direction: get_opt("Direction"),
            duration_secs,
            recording_url: get_opt("RecordingUrl"),
            dial_child_sid,
            contact_id: None,
            account_id: None,
        }
    }
}

/// Normalize a webhook body into a flat string map.
///
/// JSON bodies are detected by content type or a leading brace, anything
/// else is treated as form-encoded. Malformed bodies yield an empty map so
/// the handler keeps going with whatever it has.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> HashMap<String, String> {
    let looks_like_json = content_type
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false)
        || body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');

    if looks_like_json {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect(),
            _ => HashMap::new(),
        }
    } else {
        url::form_urlencoded::parse(body)
            .into_owned()
            .collect()
    }
}
