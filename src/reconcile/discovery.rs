use crate::event::StatusEvent;
use crate::provider::{Leg, TelephonyProvider};
use tracing::{debug, warn};

/// Every leg of the logical call we could find, anchored on the leg that
/// triggered the event.
#[derive(Debug, Clone)]
pub struct RelatedLegs {
    pub triggering: Leg,
    /// Child leg named by the event's dial hint, when one was given.
    pub dial_child: Option<Leg>,
    pub children: Vec<Leg>,
    pub parent: Option<Leg>,
    /// Other children of the parent, when the triggering leg is itself a
    /// child. Needed so a hang-up on one child tears down the rest.
    pub siblings: Vec<Leg>,
}

impl RelatedLegs {
    /// Candidate legs for the recording reconciler, in discovery order:
    /// the dial hint, then discovered children, then the triggering leg,
    /// then the parent. Prioritization reorders and dedupes afterwards.
    pub fn candidates(&self) -> Vec<Leg> {
        let mut legs = Vec::new();
        if let Some(child) = &self.dial_child {
            legs.push(child.clone());
        }
        legs.extend(self.children.iter().cloned());
        legs.push(self.triggering.clone());
        if let Some(parent) = &self.parent {
            legs.push(parent.clone());
        }
        legs
    }

    pub fn parent_sid(&self) -> Option<&str> {
        self.parent
            .as_ref()
            .map(|p| p.sid.as_str())
            .or(self.triggering.parent_sid.as_deref())
    }
}

/// Find all legs related to the event's call sid. Every lookup here is
/// best-effort: a failed fetch shrinks the candidate set instead of
/// aborting, falling back to legs synthesized from the event itself.
pub async fn discover(
    provider: &dyn TelephonyProvider,
    event: &StatusEvent,
    limit: usize,
) -> RelatedLegs {
    let call_sid = event.call_sid.as_str();

    let triggering = match provider.fetch_call(call_sid).await {
        Ok(leg) => leg,
        Err(e) => {
            debug!(call_sid, "could not fetch triggering leg, using event fields: {}", e);
            leg_from_event(event)
        }
    };

    let dial_child = match &event.dial_child_sid {
        Some(sid) if sid != call_sid => Some(match provider.fetch_call(sid).await {
            Ok(leg) => leg,
            Err(e) => {
                debug!(dial_child = sid.as_str(), "could not fetch dial child: {}", e);
                Leg::unresolved(sid.clone())
            }
        }),
        _ => None,
    };

    let children = match provider.list_child_calls(call_sid, limit).await {
        Ok(children) => children,
        Err(e) => {
            warn!(call_sid, "child leg discovery failed: {}", e);
            vec![]
        }
    };

    let parent = match &triggering.parent_sid {
        Some(parent_sid) if parent_sid != call_sid => {
            match provider.fetch_call(parent_sid).await {
                Ok(leg) => Some(leg),
                Err(e) => {
                    debug!(parent_sid = parent_sid.as_str(), "could not fetch parent leg: {}", e);
                    Some(Leg::unresolved(parent_sid.clone()))
                }
            }
        }
        _ => None,
    };

    let siblings = match &parent {
        Some(parent) => match provider.list_child_calls(&parent.sid, limit).await {
            Ok(legs) => legs.into_iter().filter(|l| l.sid != call_sid).collect(),
            Err(e) => {
                debug!(parent_sid = parent.sid.as_str(), "sibling leg discovery failed: {}", e);
                vec![]
            }
        },
        None => vec![],
    };

    RelatedLegs {
        triggering,
        dial_child,
        children,
        parent,
        siblings,
    }
}

fn leg_from_event(event: &StatusEvent) -> Leg {
    Leg {
        sid: event.call_sid.clone(),
        parent_sid: None,
        direction: event
            .direction
            .as_deref()
            .map(crate::provider::Direction::parse)
            .unwrap_or(crate::provider::Direction::Other),
        from: event.from.clone(),
        to: event.to.clone(),
        status: event.status,
    }
}
