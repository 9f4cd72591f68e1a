use super::classify::prioritize;
use super::discovery;
use super::recording::{ensure_dual_recording, RecordingOutcome};
use super::terminate::cascade_teardown;
use crate::callrecord::{CallRecordSink, CallSummary};
use crate::config::Config;
use crate::event::{CallStatus, StatusEvent};
use crate::provider::{
    ApiError, Direction, Leg, Recording, RecordingSource, RecordingStatus, TelephonyProvider,
    ERROR_CALL_NOT_FOUND,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory provider that records every API call it receives, with
/// injectable failures. Plays the same role the live REST client does, one
/// logical call at a time.
#[derive(Default)]
struct MockProvider {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    legs: HashMap<String, Leg>,
    recordings: HashMap<String, Vec<Recording>>,
    /// Sids the provider pretends not to know (20404 on any access).
    missing: HashSet<String>,
    /// Sids where starting a recording fails.
    fail_create: HashSet<String>,
    fail_stop: bool,
    /// Ordered log of mutating/querying operations, e.g. "create:CA1".
    log: Vec<String>,
}

fn not_found() -> anyhow::Error {
    ApiError {
        status: 404,
        code: Some(ERROR_CALL_NOT_FOUND),
        message: "The requested resource was not found".to_string(),
    }
    .into()
}

impl MockProvider {
    fn with_legs(legs: Vec<Leg>) -> Self {
        let provider = Self::default();
        {
            let mut state = provider.state.lock().unwrap();
            for leg in legs {
                state.legs.insert(leg.sid.clone(), leg);
            }
        }
        provider
    }

    fn add_recording(&self, rec: Recording) {
        let mut state = self.state.lock().unwrap();
        state
            .recordings
            .entry(rec.call_sid.clone())
            .or_default()
            .push(rec);
    }

    fn mark_missing(&self, sid: &str) {
        self.state.lock().unwrap().missing.insert(sid.to_string());
    }

    fn fail_create_on(&self, sid: &str) {
        self.state.lock().unwrap().fail_create.insert(sid.to_string());
    }

    fn fail_stop(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn ops(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|op| op.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl TelephonyProvider for MockProvider {
    async fn fetch_call(&self, sid: &str) -> Result<Leg> {
        let state = self.state.lock().unwrap();
        if state.missing.contains(sid) {
            return Err(not_found());
        }
        state
            .legs
            .get(sid)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn list_child_calls(&self, parent_sid: &str, _limit: usize) -> Result<Vec<Leg>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .legs
            .values()
            .filter(|l| l.parent_sid.as_deref() == Some(parent_sid))
            .cloned()
            .collect())
    }

    async fn terminate_call(&self, sid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("terminate:{}", sid));
        if state.missing.contains(sid) {
            return Err(not_found());
        }
        if let Some(leg) = state.legs.get_mut(sid) {
            leg.status = Some(CallStatus::Completed);
            Ok(())
        } else {
            Err(not_found())
        }
    }

    async fn list_recordings(&self, call_sid: &str) -> Result<Vec<Recording>> {
        let state = self.state.lock().unwrap();
        Ok(state.recordings.get(call_sid).cloned().unwrap_or_default())
    }

    async fn start_dual_recording(
        &self,
        call_sid: &str,
        _status_callback: &str,
    ) -> Result<Recording> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("create:{}", call_sid));
        if state.fail_create.contains(call_sid) {
            anyhow::bail!("recording start rejected for {}", call_sid);
        }
        let rec = Recording {
            sid: format!("RE_{}", call_sid),
            call_sid: call_sid.to_string(),
            channels: 2,
            source: RecordingSource::Api,
            status: RecordingStatus::InProgress,
            media_url: Some(format!("https://mock/Recordings/RE_{}", call_sid)),
        };
        state
            .recordings
            .entry(call_sid.to_string())
            .or_default()
            .push(rec.clone());
        Ok(rec)
    }

    async fn stop_recording(&self, call_sid: &str, recording_sid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("stop:{}:{}", call_sid, recording_sid));
        if state.fail_stop {
            anyhow::bail!("stop rejected");
        }
        if let Some(recs) = state.recordings.get_mut(call_sid) {
            for rec in recs.iter_mut().filter(|r| r.sid == recording_sid) {
                rec.status = RecordingStatus::Stopped;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockSink {
    upserts: Mutex<Vec<CallSummary>>,
    transcriptions: Mutex<Vec<String>>,
}

#[async_trait]
impl CallRecordSink for MockSink {
    async fn upsert_call(&self, _base_url: &str, summary: &CallSummary) -> Result<()> {
        self.upserts.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn trigger_transcription(
        &self,
        _base_url: &str,
        call_sid: &str,
        _recording_url: &str,
    ) -> Result<()> {
        self.transcriptions
            .lock()
            .unwrap()
            .push(call_sid.to_string());
        Ok(())
    }
}

fn pstn_leg(sid: &str, parent: Option<&str>) -> Leg {
    Leg {
        sid: sid.to_string(),
        parent_sid: parent.map(str::to_string),
        direction: Direction::OutboundDial,
        from: "+15550001111".to_string(),
        to: "+15552223333".to_string(),
        status: Some(CallStatus::InProgress),
    }
}

fn client_leg(sid: &str, parent: Option<&str>) -> Leg {
    Leg {
        sid: sid.to_string(),
        parent_sid: parent.map(str::to_string),
        direction: Direction::Inbound,
        from: "client:agent42".to_string(),
        to: "+15552223333".to_string(),
        status: Some(CallStatus::InProgress),
    }
}

fn active_recording(call_sid: &str, sid: &str, channels: u8, source: RecordingSource) -> Recording {
    Recording {
        sid: sid.to_string(),
        call_sid: call_sid.to_string(),
        channels,
        source,
        status: RecordingStatus::InProgress,
        media_url: Some(format!("https://mock/Recordings/{}", sid)),
    }
}

fn event(call_sid: &str, status: CallStatus) -> StatusEvent {
    StatusEvent {
        call_sid: call_sid.to_string(),
        status: Some(status),
        to: "+15552223333".to_string(),
        from: "+15550001111".to_string(),
        duration_secs: Some(30),
        ..Default::default()
    }
}

fn test_config() -> Config {
    Config {
        business_numbers: vec!["(555) 000-1111".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_duplicate_events_start_recording_once() {
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        pstn_leg("CA_child", Some("CA_parent")),
    ]);
    let sink = MockSink::default();
    let config = test_config();
    let ev = event("CA_parent", CallStatus::InProgress);

    // The provider redelivers the same in-progress notification; only the
    // first pass may create a recording.
    for _ in 0..3 {
        super::process_event(&provider, &sink, &config, "https://crm.example.com", &ev).await;
    }

    assert_eq!(provider.ops("create:").len(), 1);
    assert_eq!(provider.ops("create:")[0], "create:CA_child");
}

#[tokio::test]
async fn test_carrier_leg_attempted_before_client_leg() {
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        client_leg("CA_client_child", Some("CA_parent")),
        pstn_leg("CA_pstn_child", Some("CA_parent")),
    ]);
    let ev = event("CA_parent", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let candidates = prioritize(related.candidates());
    let outcome = ensure_dual_recording(&provider, &candidates, "https://cb.example.com").await;

    assert!(matches!(outcome, RecordingOutcome::Started { ref call_sid, .. } if call_sid == "CA_pstn_child"));
    assert_eq!(provider.ops("create:"), vec!["create:CA_pstn_child"]);
}

#[tokio::test]
async fn test_dial_verb_recording_defers_everything() {
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        pstn_leg("CA_child", Some("CA_parent")),
    ]);
    provider.add_recording(active_recording(
        "CA_child",
        "RE_dialverb",
        1,
        RecordingSource::DialVerb,
    ));
    let ev = event("CA_parent", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let candidates = prioritize(related.candidates());
    let outcome = ensure_dual_recording(&provider, &candidates, "https://cb.example.com").await;

    assert!(matches!(outcome, RecordingOutcome::DeferredToDialVerb { .. }));
    assert!(provider.ops("create:").is_empty());
    assert!(provider.ops("stop:").is_empty());
}

#[tokio::test]
async fn test_existing_dual_recording_satisfies() {
    let provider = MockProvider::with_legs(vec![pstn_leg("CA1", None)]);
    provider.add_recording(active_recording("CA1", "RE_dual", 2, RecordingSource::Api));
    let ev = event("CA1", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let outcome =
        ensure_dual_recording(&provider, &prioritize(related.candidates()), "https://cb").await;

    assert!(matches!(outcome, RecordingOutcome::AlreadyDual { .. }));
    assert!(provider.ops("create:").is_empty());
}

#[tokio::test]
async fn test_mono_recording_stopped_before_dual_start() {
    let provider = MockProvider::with_legs(vec![pstn_leg("CA1", None)]);
    provider.add_recording(active_recording("CA1", "RE_mono", 1, RecordingSource::Api));
    let ev = event("CA1", CallStatus::Answered);

    let related = discovery::discover(&provider, &ev, 20).await;
    let outcome =
        ensure_dual_recording(&provider, &prioritize(related.candidates()), "https://cb").await;

    assert!(matches!(outcome, RecordingOutcome::Started { .. }));
    let log = provider.log();
    let stop_idx = log.iter().position(|op| op == "stop:CA1:RE_mono").unwrap();
    let create_idx = log.iter().position(|op| op == "create:CA1").unwrap();
    assert!(stop_idx < create_idx, "stop must precede create: {:?}", log);
}

#[tokio::test]
async fn test_dual_start_attempted_even_when_stop_fails() {
    let provider = MockProvider::with_legs(vec![pstn_leg("CA1", None)]);
    provider.add_recording(active_recording("CA1", "RE_mono", 1, RecordingSource::Api));
    provider.fail_stop();
    let ev = event("CA1", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let outcome =
        ensure_dual_recording(&provider, &prioritize(related.candidates()), "https://cb").await;

    assert!(matches!(outcome, RecordingOutcome::Started { .. }));
    assert_eq!(provider.ops("create:"), vec!["create:CA1"]);
}

#[tokio::test]
async fn test_start_failure_falls_through_to_next_candidate() {
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        pstn_leg("CA_pstn", Some("CA_parent")),
    ]);
    provider.fail_create_on("CA_pstn");
    let ev = event("CA_parent", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let outcome =
        ensure_dual_recording(&provider, &prioritize(related.candidates()), "https://cb").await;

    // The carrier leg refused; the client (parent) leg takes the recording.
    assert!(matches!(outcome, RecordingOutcome::Started { ref call_sid, .. } if call_sid == "CA_parent"));
    assert_eq!(
        provider.ops("create:"),
        vec!["create:CA_pstn", "create:CA_parent"]
    );
}

#[tokio::test]
async fn test_all_candidates_exhausted() {
    let provider = MockProvider::with_legs(vec![pstn_leg("CA1", None)]);
    provider.fail_create_on("CA1");
    let ev = event("CA1", CallStatus::InProgress);

    let related = discovery::discover(&provider, &ev, 20).await;
    let outcome =
        ensure_dual_recording(&provider, &prioritize(related.candidates()), "https://cb").await;

    assert_eq!(outcome, RecordingOutcome::Exhausted);
}

#[tokio::test]
async fn test_cascade_terminates_siblings_and_parent() {
    // One parent bridging two children; child A hangs up first.
    let parent = client_leg("CA_parent", None);
    let mut child_a = pstn_leg("CA_a", Some("CA_parent"));
    child_a.status = Some(CallStatus::Completed);
    let child_b = pstn_leg("CA_b", Some("CA_parent"));

    let provider = MockProvider::with_legs(vec![parent, child_a, child_b]);
    let ev = event("CA_a", CallStatus::Completed);

    let related = discovery::discover(&provider, &ev, 20).await;
    cascade_teardown(&provider, "CA_a", &related).await;

    let terminated = provider.ops("terminate:");
    assert!(terminated.contains(&"terminate:CA_b".to_string()));
    assert!(terminated.contains(&"terminate:CA_parent".to_string()));
    assert!(!terminated.contains(&"terminate:CA_a".to_string()));
}

#[tokio::test]
async fn test_cascade_survives_missing_leg() {
    let parent = client_leg("CA_parent", None);
    let mut child_a = pstn_leg("CA_a", Some("CA_parent"));
    child_a.status = Some(CallStatus::Completed);
    let child_b = pstn_leg("CA_b", Some("CA_parent"));

    let provider = MockProvider::with_legs(vec![parent, child_a, child_b]);
    let ev = event("CA_a", CallStatus::Completed);
    let related = discovery::discover(&provider, &ev, 20).await;

    // Child B evaporates between discovery and teardown.
    provider.mark_missing("CA_b");
    cascade_teardown(&provider, "CA_a", &related).await;

    // Its disappearance must not block the parent teardown.
    assert!(provider
        .ops("terminate:")
        .contains(&"terminate:CA_parent".to_string()));
}

#[tokio::test]
async fn test_completed_call_upserts_at_most_twice() {
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        pstn_leg("CA_child", Some("CA_parent")),
    ]);
    // A finished dual recording exists on the child but the completion
    // event carried no URL; the fallback lookup must find it.
    provider.add_recording(Recording {
        sid: "RE_done".to_string(),
        call_sid: "CA_child".to_string(),
        channels: 2,
        source: RecordingSource::Api,
        status: RecordingStatus::Completed,
        media_url: Some("https://mock/Recordings/RE_done".to_string()),
    });
    let sink = MockSink::default();
    let config = test_config();
    let ev = event("CA_parent", CallStatus::Completed);

    super::process_event(&provider, &sink, &config, "https://crm.example.com", &ev).await;

    let upserts = sink.upserts.lock().unwrap();
    assert_eq!(upserts.len(), 2);
    assert!(upserts[0].recording_url.is_none());
    assert_eq!(
        upserts[1].recording_url.as_deref(),
        Some("https://mock/Recordings/RE_done.mp3")
    );
    assert_eq!(*sink.transcriptions.lock().unwrap(), vec!["CA_parent"]);
}

#[tokio::test]
async fn test_fallback_finds_recording_on_parent_leg() {
    // The carrier child refused the recording start earlier in the call, so
    // the recording landed on the parent. The child hangs up and reports
    // completion with no URL; the lookup must reach the parent leg.
    let provider = MockProvider::with_legs(vec![
        client_leg("CA_parent", None),
        pstn_leg("CA_child", Some("CA_parent")),
    ]);
    provider.add_recording(Recording {
        sid: "RE_on_parent".to_string(),
        call_sid: "CA_parent".to_string(),
        channels: 2,
        source: RecordingSource::Api,
        status: RecordingStatus::Completed,
        media_url: Some("https://mock/Recordings/RE_on_parent".to_string()),
    });
    // The call is over; fresh recording starts are rejected on both legs.
    provider.fail_create_on("CA_child");
    provider.fail_create_on("CA_parent");
    let sink = MockSink::default();
    let config = test_config();
    let ev = event("CA_child", CallStatus::Completed);

    super::process_event(&provider, &sink, &config, "https://crm.example.com", &ev).await;

    let upserts = sink.upserts.lock().unwrap();
    assert_eq!(upserts.len(), 2);
    assert_eq!(
        upserts[1].recording_url.as_deref(),
        Some("https://mock/Recordings/RE_on_parent.mp3")
    );
    assert_eq!(*sink.transcriptions.lock().unwrap(), vec!["CA_child"]);
}

#[tokio::test]
async fn test_no_upsert_before_completion() {
    let provider = MockProvider::with_legs(vec![pstn_leg("CA1", None)]);
    let sink = MockSink::default();
    let config = test_config();

    for status in [CallStatus::Ringing, CallStatus::InProgress, CallStatus::Answered] {
        let ev = event("CA1", status);
        super::process_event(&provider, &sink, &config, "https://crm.example.com", &ev).await;
    }

    assert!(sink.upserts.lock().unwrap().is_empty());
    assert!(sink.transcriptions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_discovery_failure_still_yields_triggering_candidate() {
    let provider = MockProvider::default();
    let mut ev = event("CA_unknown", CallStatus::InProgress);
    ev.dial_child_sid = Some("CA_hint".to_string());

    let related = discovery::discover(&provider, &ev, 20).await;
    let candidates = prioritize(related.candidates());

    let sids: Vec<&str> = candidates.iter().map(|l| l.sid.as_str()).collect();
    assert!(sids.contains(&"CA_unknown"));
    assert!(sids.contains(&"CA_hint"));
}
