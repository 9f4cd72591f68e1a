use crate::provider::{Direction, Leg};
use std::collections::HashSet;

/// Addressing convention for softphone endpoints.
const CLIENT_PREFIX: &str = "client:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// A carrier-network (PSTN) number.
    Carrier,
    /// A softphone identified by the client addressing convention.
    SoftphoneClient,
}

pub fn classify_endpoint(endpoint: &str) -> EndpointKind {
    if endpoint.trim().to_ascii_lowercase().starts_with(CLIENT_PREFIX) {
        EndpointKind::SoftphoneClient
    } else {
        EndpointKind::Carrier
    }
}

/// A carrier leg is a dial-bridged connection where both endpoints are on
/// the carrier network. These carry the audio that matters for dual-channel
/// capture, so they are tried first.
pub fn is_carrier_leg(leg: &Leg) -> bool {
    leg.direction == Direction::OutboundDial
        && classify_endpoint(&leg.from) == EndpointKind::Carrier
        && classify_endpoint(&leg.to) == EndpointKind::Carrier
}

/// Order candidate legs carrier-first, keeping the given order within each
/// group and dropping duplicate sids (a dial-child hint often shows up
/// again among discovered children).
pub fn prioritize(legs: Vec<Leg>) -> Vec<Leg> {
    let mut seen = HashSet::new();
    let mut carrier = Vec::new();
    let mut other = Vec::new();
    for leg in legs {
        if leg.sid.is_empty() || !seen.insert(leg.sid.clone()) {
            continue;
        }
        if is_carrier_leg(&leg) {
            carrier.push(leg);
        } else {
            other.push(leg);
        }
    }
    carrier.extend(other);
    carrier
}

/// Normalize a phone number to its last ten digits for comparison. Handles
/// formatting and country-code differences between configured numbers and
/// provider-reported ones.
pub fn last_ten_digits(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

pub fn is_business_number(number: &str, business_numbers: &[String]) -> bool {
    let normalized = last_ten_digits(number);
    if normalized.is_empty() {
        return false;
    }
    business_numbers
        .iter()
        .any(|b| last_ten_digits(b) == normalized)
}
