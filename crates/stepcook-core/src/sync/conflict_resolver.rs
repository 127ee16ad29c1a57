//! Conflict resolution between local and remote session snapshots.
//!
//! Resolution is by `sync_version` alone, never by timestamp, so the outcome
//! is deterministic under clock skew. Snapshots are never merged field by
//! field: a running timer merged with a paused one has no meaning.
//!
//! The one exception to version order is finality. A session that has
//! finished on one side is never revived by an active copy from the other,
//! whatever its version.

use crate::session::CookingSession;

/// Merge decision for a pair of snapshot versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Local is newer (or remote has none): push local.
    UseLocal,
    /// Remote is newer (or local has none): replace local.
    UseRemote,
    InSync,
    /// Neither side has the session.
    Missing,
}

/// Decide which copy wins given the versions each side holds.
pub fn decide_by_version(local: Option<u64>, remote: Option<u64>) -> MergeDecision {
    match (local, remote) {
        (None, None) => MergeDecision::Missing,
        (Some(_), None) => MergeDecision::UseLocal,
        (None, Some(_)) => MergeDecision::UseRemote,
        (Some(l), Some(r)) if l > r => MergeDecision::UseLocal,
        (Some(l), Some(r)) if r > l => MergeDecision::UseRemote,
        (Some(_), Some(_)) => MergeDecision::InSync,
    }
}

/// Decide which snapshot wins. Finished beats active; two different
/// finished outcomes are left as they are on each side.
pub fn decide(local: Option<&CookingSession>, remote: Option<&CookingSession>) -> MergeDecision {
    if let (Some(l), Some(r)) = (local, remote) {
        match (l.is_terminal(), r.is_terminal()) {
            (true, false) => return MergeDecision::UseLocal,
            (false, true) => return MergeDecision::UseRemote,
            (true, true) if !l.same_state(r) => return MergeDecision::InSync,
            _ => {}
        }
    }
    decide_by_version(
        local.map(|s| s.sync_version),
        remote.map(|s| s.sync_version),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::Utc;

    fn snapshot(status: SessionStatus, version: u64) -> CookingSession {
        let mut s = CookingSession::new("r", Utc::now());
        s.session_id = "s".into();
        s.status = status;
        s.sync_version = version;
        s
    }

    #[test]
    fn higher_version_wins() {
        assert_eq!(decide_by_version(Some(5), Some(3)), MergeDecision::UseLocal);
        assert_eq!(decide_by_version(Some(3), Some(5)), MergeDecision::UseRemote);
    }

    #[test]
    fn equal_versions_are_in_sync() {
        assert_eq!(decide_by_version(Some(4), Some(4)), MergeDecision::InSync);
        assert_eq!(decide_by_version(Some(0), Some(0)), MergeDecision::InSync);
    }

    #[test]
    fn one_sided_presence() {
        assert_eq!(decide_by_version(Some(0), None), MergeDecision::UseLocal);
        assert_eq!(decide_by_version(None, Some(0)), MergeDecision::UseRemote);
        assert_eq!(decide_by_version(None, None), MergeDecision::Missing);
    }

    #[test]
    fn finished_side_wins_over_active() {
        let abandoned = snapshot(SessionStatus::Abandoned, 2);
        let active = snapshot(SessionStatus::InProgress, 9);
        assert_eq!(decide(Some(&abandoned), Some(&active)), MergeDecision::UseLocal);
        assert_eq!(decide(Some(&active), Some(&abandoned)), MergeDecision::UseRemote);
    }

    #[test]
    fn differing_finished_outcomes_stay_put() {
        let completed = snapshot(SessionStatus::Completed, 3);
        let abandoned = snapshot(SessionStatus::Abandoned, 5);
        assert_eq!(decide(Some(&completed), Some(&abandoned)), MergeDecision::InSync);

        let mut restamped = completed.clone();
        restamped.sync_version = 7;
        assert_eq!(decide(Some(&completed), Some(&restamped)), MergeDecision::UseRemote);
    }

    #[test]
    fn active_pairs_fall_back_to_version() {
        let older = snapshot(SessionStatus::InProgress, 1);
        let newer = snapshot(SessionStatus::Paused, 4);
        assert_eq!(decide(Some(&older), Some(&newer)), MergeDecision::UseRemote);
        assert_eq!(decide(None, None), MergeDecision::Missing);
    }
}
