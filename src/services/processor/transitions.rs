//! Outside/Inside transition rules for one (unit, zone) pair

use crate::domain::types::UnitZoneState;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Outside (or never seen) -> inside
    Enter,
    /// Inside -> outside
    Exit,
    /// Still inside since `entered_at`; a dwell may be due
    Stay { entered_at: DateTime<Utc> },
    /// Still outside; nothing to write
    StayOutside,
    /// Older than the last observation for this pair; ignored
    Stale,
}

/// Decide the transition for a new observation at `ts`
///
/// A missing record counts as outside. An inside record without `entered_at`
/// is treated as entered at `ts`.
pub fn decide(prev: Option<&UnitZoneState>, inside: bool, ts: DateTime<Utc>) -> Transition {
    if prev.is_some_and(|p| ts < p.last_seen) {
        return Transition::Stale;
    }

    match (prev.filter(|p| p.is_inside), inside) {
        (None, true) => Transition::Enter,
        (None, false) => Transition::StayOutside,
        (Some(_), false) => Transition::Exit,
        (Some(p), true) => Transition::Stay { entered_at: p.entered_at.unwrap_or(ts) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_absent_state_is_outside() {
        assert_eq!(decide(None, true, t(0)), Transition::Enter);
        assert_eq!(decide(None, false, t(0)), Transition::StayOutside);
    }

    #[test]
    fn test_inside_transitions() {
        let inside = UnitZoneState::entered(t(100));
        assert_eq!(decide(Some(&inside), false, t(200)), Transition::Exit);
        assert_eq!(decide(Some(&inside), true, t(200)), Transition::Stay { entered_at: t(100) });
    }

    #[test]
    fn test_outside_transitions() {
        let outside = UnitZoneState::left(t(100));
        assert_eq!(decide(Some(&outside), true, t(200)), Transition::Enter);
        assert_eq!(decide(Some(&outside), false, t(200)), Transition::StayOutside);
    }

    #[test]
    fn test_older_observation_is_stale() {
        let inside = UnitZoneState::entered(t(100));
        assert_eq!(decide(Some(&inside), false, t(99)), Transition::Stale);
        // Same timestamp is a re-delivery, not stale
        assert_eq!(decide(Some(&inside), true, t(100)), Transition::Stay { entered_at: t(100) });
    }

    #[test]
    fn test_missing_entered_at_repaired() {
        let broken = UnitZoneState { is_inside: true, entered_at: None, last_seen: t(100) };
        assert_eq!(decide(Some(&broken), true, t(150)), Transition::Stay { entered_at: t(150) });
    }
}
