use crate::event::CallStatus;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod twilio;
pub use twilio::TwilioProvider;

/// Provider error code meaning the call no longer exists. Hanging up a leg
/// that already dropped its connection reports this; the cascade treats it
/// as already-gone.
pub const ERROR_CALL_NOT_FOUND: u32 = 20404;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    OutboundApi,
    OutboundDial,
    Other,
}

impl Direction {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Self::Inbound,
            "outbound-api" => Self::OutboundApi,
            "outbound-dial" => Self::OutboundDial,
            _ => Self::Other,
        }
    }
}

/// One participant connection within a logical call, as the provider sees it.
#[derive(Debug, Clone)]
pub struct Leg {
    pub sid: String,
    pub parent_sid: Option<String>,
    pub direction: Direction,
    pub from: String,
    pub to: String,
    pub status: Option<CallStatus>,
}

impl Leg {
    /// Placeholder for a leg we know only by sid, when a fetch failed or the
    /// sid came from an event hint. Classifies as non-carrier.
    pub fn unresolved(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            parent_sid: None,
            direction: Direction::Other,
            from: String::new(),
            to: String::new(),
            status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingSource {
    /// Started declaratively by the dial verb in the call routing document.
    DialVerb,
    /// Started imperatively through the REST API (that is us).
    Api,
    Other,
}

impl RecordingSource {
    pub fn parse(value: &str) -> Self {
        match value {
            "DialVerb" | "RecordVerb" => Self::DialVerb,
            "StartCallRecordingAPI" | "OutboundAPI" => Self::Api,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    InProgress,
    Paused,
    Stopped,
    Processing,
    Completed,
    Other,
}

impl RecordingStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "in-progress" => Self::InProgress,
            "paused" => Self::Paused,
            "stopped" => Self::Stopped,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub sid: String,
    pub call_sid: String,
    /// 1 = mono, 2 = dual.
    pub channels: u8,
    pub source: RecordingSource,
    pub status: RecordingStatus,
    pub media_url: Option<String>,
}

impl Recording {
    pub fn is_active(&self) -> bool {
        matches!(self.status, RecordingStatus::InProgress | RecordingStatus::Paused)
    }

    pub fn is_dual(&self) -> bool {
        self.channels == 2
    }
}

/// Error from the provider's REST API, carrying the provider-assigned error
/// code so callers can recognize specific conditions.
#[derive(Debug)]
pub struct ApiError {
    pub status: u16,
    pub code: Option<u32>,
    pub message: String,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        self.code == Some(ERROR_CALL_NOT_FOUND) || self.status == 404
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "provider api error {} (code {}): {}", self.status, code, self.message),
            None => write!(f, "provider api error {}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Returns true when an error chain bottoms out in the provider's
/// call-not-found condition.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map(|e| e.is_not_found())
        .unwrap_or(false)
}

/// The outbound surface of the telephony provider. Everything the
/// reconciler does to live call state goes through here, which is also the
/// seam the tests mock.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn fetch_call(&self, sid: &str) -> Result<Leg>;

    /// Legs whose parent is `parent_sid`, bounded by `limit`.
    async fn list_child_calls(&self, parent_sid: &str, limit: usize) -> Result<Vec<Leg>>;

    /// Hang up a leg by driving its status to completed.
    async fn terminate_call(&self, sid: &str) -> Result<()>;

    async fn list_recordings(&self, call_sid: &str) -> Result<Vec<Recording>>;

    /// Start a dual-channel, both-tracks recording on the leg, with a
    /// status callback for recording lifecycle notifications.
    async fn start_dual_recording(&self, call_sid: &str, status_callback: &str)
        -> Result<Recording>;

    async fn stop_recording(&self, call_sid: &str, recording_sid: &str) -> Result<()>;
}

pub type ProviderRef = Arc<dyn TelephonyProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("inbound"), Direction::Inbound);
        assert_eq!(Direction::parse("Outbound-Dial"), Direction::OutboundDial);
        assert_eq!(Direction::parse("outbound-api"), Direction::OutboundApi);
        assert_eq!(Direction::parse("trunking-originating"), Direction::Other);
    }

    #[test]
    fn test_recording_source_parse() {
        assert_eq!(RecordingSource::parse("DialVerb"), RecordingSource::DialVerb);
        assert_eq!(
            RecordingSource::parse("StartCallRecordingAPI"),
            RecordingSource::Api
        );
        assert_eq!(RecordingSource::parse("Conference"), RecordingSource::Other);
    }

    #[test]
    fn test_recording_activity() {
        let mut rec = Recording {
            sid: "RE1".to_string(),
            call_sid: "CA1".to_string(),
            channels: 2,
            source: RecordingSource::Api,
            status: RecordingStatus::InProgress,
            media_url: None,
        };
        assert!(rec.is_active());
        assert!(rec.is_dual());
        rec.status = RecordingStatus::Stopped;
        assert!(!rec.is_active());
    }

    #[test]
    fn test_not_found_detection() {
        let err: anyhow::Error = ApiError {
            status: 404,
            code: Some(ERROR_CALL_NOT_FOUND),
            message: "not found".to_string(),
        }
        .into();
        assert!(is_not_found(&err));
        assert!(!is_not_found(&anyhow::anyhow!("connection reset")));
    }
}
