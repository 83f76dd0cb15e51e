//! Signal estimation and confidence scoring
//!
//! The engine has no access to genuine radio signal strength, so round-trip
//! time is the only correlate of link quality. The RTT-to-score mapping and
//! its bounds are a contract with downstream consumers (the audit CSV, the
//! confidence bands); the coefficients must not drift.

/// Worst possible score; also the fixed score for unreachable hosts
pub const SIGNAL_FLOOR: i16 = -100;

/// Best possible score, reached as RTT approaches zero
pub const SIGNAL_CEIL: i16 = -30;

/// Score penalty per millisecond of round-trip time
const RTT_PENALTY: f64 = 1.5;

/// Result of mapping one probe measurement to a signal estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEstimate {
    pub score: i16,
    pub online: bool,
}

/// Map a round-trip time to a bounded signal score.
///
/// `None` means the probe failed or timed out: the host gets the floor
/// score and counts as offline. A reachable host whose RTT is bad enough
/// to clamp all the way to the floor is also treated as offline.
pub fn estimate(rtt_ms: Option<f64>) -> SignalEstimate {
    match rtt_ms {
        None => SignalEstimate {
            score: SIGNAL_FLOOR,
            online: false,
        },
        Some(rtt) => {
            let raw = (f64::from(SIGNAL_CEIL) - RTT_PENALTY * rtt).round() as i64;
            let score = raw.clamp(i64::from(SIGNAL_FLOOR), i64::from(SIGNAL_CEIL)) as i16;
            SignalEstimate {
                score,
                online: score > SIGNAL_FLOOR,
            }
        }
    }
}

/// Heuristic reliability of a measurement, in [0, 1].
///
/// An offline reading is highly trusted: false negatives are rare for
/// ICMP-class probes. Online readings are banded by score, strongest band
/// first, so a tie at a boundary resolves to the stronger band.
pub fn confidence(score: i16, online: bool) -> f64 {
    if !online {
        return 0.95;
    }
    if score > -40 {
        0.95
    } else if score > -60 {
        0.85
    } else if score > -80 {
        0.70
    } else {
        0.50
    }
}
