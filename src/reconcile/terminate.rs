use super::discovery::RelatedLegs;
use crate::event::CallStatus;
use crate::provider::{self, TelephonyProvider};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Tear down every other leg of the call once one leg reports completed, so
/// a hang-up anywhere ends the whole conversation instead of leaving the
/// far side connected.
///
/// Each leg is handled independently; a failure on one never stops the
/// others. The provider's call-not-found error means the leg is already
/// gone and is ignored.
pub async fn cascade_teardown(
    provider: &dyn TelephonyProvider,
    reporter_sid: &str,
    related: &RelatedLegs,
) {
    let mut targets: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(reporter_sid);

    for leg in related
        .children
        .iter()
        .chain(related.siblings.iter())
        .filter(|l| !l.status.map(|s| s.is_terminal()).unwrap_or(false))
    {
        if seen.insert(&leg.sid) {
            targets.push(leg.sid.clone());
        }
    }
    if let Some(parent_sid) = related.parent_sid() {
        if seen.insert(parent_sid) {
            targets.push(parent_sid.to_string());
        }
    }

    for sid in &targets {
        // Re-fetch right before acting; the leg may have ended on its own
        // since discovery.
        match provider.fetch_call(sid).await {
            Ok(leg) => {
                if matches!(leg.status, Some(CallStatus::Completed) | Some(CallStatus::Canceled)) {
                    debug!(call_sid = sid.as_str(), "leg already ended, skipping teardown");
                    continue;
                }
            }
            Err(e) => {
                if provider::is_not_found(&e) {
                    debug!(call_sid = sid.as_str(), "leg gone before teardown");
                    continue;
                }
                debug!(call_sid = sid.as_str(), "status re-fetch failed, terminating anyway: {}", e);
            }
        }

        match provider.terminate_call(sid).await {
            Ok(_) => info!(call_sid = sid.as_str(), "terminated related leg"),
            Err(e) if provider::is_not_found(&e) => {
                debug!(call_sid = sid.as_str(), "leg already gone during teardown");
            }
            Err(e) => {
                warn!(call_sid = sid.as_str(), "failed to terminate related leg: {}", e);
            }
        }
    }
}
