use crate::provider::{Leg, RecordingSource, TelephonyProvider};
use tracing::{debug, info, warn};

/// How one reconciliation pass over the candidate legs ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    /// An active dial-verb recording exists; starting a REST recording next
    /// to it could conflict, so we leave the call alone entirely.
    DeferredToDialVerb { call_sid: String, recording_sid: String },
    /// An active dual-channel recording already exists; nothing to do.
    AlreadyDual { call_sid: String, recording_sid: String },
    /// We started a dual recording on this leg.
    Started { call_sid: String, recording_sid: String },
    /// Every candidate was tried and none accepted a recording.
    Exhausted,
}

/// Ensure one dual-channel recording is active for the logical call.
///
/// Walks the candidates in priority order and stops at the first leg with a
/// terminal outcome. Recording state is re-read immediately before each
/// mutation; that re-check is the idempotency guard under duplicated and
/// reordered webhook deliveries. Two invocations can still pass the check
/// together and double-start in a narrow window; that race is accepted
/// rather than locked away.
pub async fn ensure_dual_recording(
    provider: &dyn TelephonyProvider,
    candidates: &[Leg],
    status_callback: &str,
) -> RecordingOutcome {
    for leg in candidates {
        let recordings = match provider.list_recordings(&leg.sid).await {
            Ok(recordings) => recordings,
            Err(e) => {
                warn!(call_sid = leg.sid.as_str(), "recording lookup failed, assuming none: {}", e);
                vec![]
            }
        };
        let active: Vec<_> = recordings.iter().filter(|r| r.is_active()).collect();

        if let Some(dial_verb) = active.iter().find(|r| r.source == RecordingSource::DialVerb) {
            debug!(
                call_sid = leg.sid.as_str(),
                recording_sid = dial_verb.sid.as_str(),
                "dial-verb recording active, deferring"
            );
            return RecordingOutcome::DeferredToDialVerb {
                call_sid: leg.sid.clone(),
                recording_sid: dial_verb.sid.clone(),
            };
        }

        if let Some(dual) = active.iter().find(|r| r.is_dual()) {
            debug!(
                call_sid = leg.sid.as_str(),
                recording_sid = dual.sid.as_str(),
                "dual recording already active"
            );
            return RecordingOutcome::AlreadyDual {
                call_sid: leg.sid.clone(),
                recording_sid: dual.sid.clone(),
            };
        }

        // A mono recording on this leg blocks a dual one; stop it first.
        // If the stop fails we still attempt the start, the provider will
        // reject it if the mono recording is genuinely still in the way.
        for mono in active.iter().filter(|r| !r.is_dual()) {
            match provider.stop_recording(&leg.sid, &mono.sid).await {
                Ok(_) => info!(
                    call_sid = leg.sid.as_str(),
                    recording_sid = mono.sid.as_str(),
                    "stopped mono recording before dual start"
                ),
                Err(e) => warn!(
                    call_sid = leg.sid.as_str(),
                    recording_sid = mono.sid.as_str(),
                    "failed to stop mono recording: {}",
                    e
                ),
            }
        }

        match provider.start_dual_recording(&leg.sid, status_callback).await {
            Ok(recording) => {
                info!(
                    call_sid = leg.sid.as_str(),
                    recording_sid = recording.sid.as_str(),
                    "started dual-channel recording"
                );
                return RecordingOutcome::Started {
                    call_sid: leg.sid.clone(),
                    recording_sid: recording.sid,
                };
            }
            Err(e) => {
                warn!(
                    call_sid = leg.sid.as_str(),
                    "dual recording start failed, trying next candidate: {}",
                    e
                );
            }
        }
    }
    RecordingOutcome::Exhausted
}
