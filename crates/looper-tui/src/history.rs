//! HistoryCoordinator — client-side state for the remote history list.
//!
//! Owns the record cache, the pending-undo set, and the refresh sequence
//! counter.  All methods are synchronous transitions; the App event-loop
//! owns the coordinator, spawns the actual HTTP calls, and feeds their
//! results back in as messages.  That keeps the mutation logic testable
//! without mounting the UI or a network.
//!
//! Optimistic protocol: a delete removes the record locally *before* the
//! call is dispatched.  On success the snapshot is enrolled for undo with a
//! fixed expiry window; on failure the snapshot is re-inserted.  Re-insert
//! appends rather than restoring the original position — the list is
//! replaced wholesale on the next refresh anyway.
//!
//! Refreshes are tagged with a monotonic sequence number allocated at spawn
//! time; a response older than the last applied one is discarded so a slow
//! fetch can never overwrite fresher data.

use std::collections::HashMap;
use std::time::Instant;

use tokio::task::AbortHandle;
use tracing::debug;

use looper_proto::history::{HistoryRecord, SortMode};

/// How long a deleted record stays restorable.
pub const UNDO_WINDOW_SECS: u64 = 10;

/// A deletion still inside its undo window.
pub struct PendingUndo {
    pub record: HistoryRecord,
    pub expires_at: Instant,
    /// Handle of the scheduled expiry task; taken (and aborted) before a
    /// user-initiated restore so the expiry can't fire mid-undo.
    abort: Option<AbortHandle>,
}

pub struct HistoryCoordinator {
    records: Vec<HistoryRecord>,
    sort: SortMode,
    pending_undo: HashMap<String, PendingUndo>,
    next_seq: u64,
    last_applied_seq: u64,
    pub loading: bool,
    pub error: Option<String>,
}

impl HistoryCoordinator {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            sort: SortMode::default(),
            pending_undo: HashMap::new(),
            next_seq: 0,
            last_applied_seq: 0,
            loading: false,
            error: None,
        }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn find(&self, video_id: &str) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.video_id == video_id)
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn set_sort(&mut self, sort: SortMode) {
        self.sort = sort;
    }

    // ── Refresh sequencing ──────────────────────────────────────────────────

    /// Allocate a sequence number for a refresh about to be spawned.
    pub fn begin_refresh(&mut self) -> u64 {
        self.next_seq += 1;
        self.loading = true;
        self.next_seq
    }

    /// Apply a refresh result.  Returns `false` when the response is stale
    /// (an out-of-order completion) and was discarded.
    pub fn apply_refresh(&mut self, seq: u64, result: Result<Vec<HistoryRecord>, String>) -> bool {
        if seq <= self.last_applied_seq {
            debug!("[history] discarding stale refresh seq={}", seq);
            return false;
        }
        self.last_applied_seq = seq;
        self.loading = false;
        match result {
            Ok(records) => {
                // Wholesale replacement — no incremental merge.
                self.records = records;
                self.error = None;
            }
            Err(e) => {
                self.error = Some(e);
            }
        }
        true
    }

    // ── Optimistic delete / compensation ────────────────────────────────────

    /// Remove a record from the local list ahead of the delete call.
    /// Returns the snapshot needed for compensation and undo enrollment.
    pub fn remove_local(&mut self, video_id: &str) -> Option<HistoryRecord> {
        let pos = self.records.iter().position(|r| r.video_id == video_id)?;
        Some(self.records.remove(pos))
    }

    /// Compensating action for a failed delete.  Appends; the original
    /// position is not restored.
    pub fn reinsert(&mut self, record: HistoryRecord) {
        if self.records.iter().any(|r| r.video_id == record.video_id) {
            return; // a refresh already brought it back
        }
        self.records.push(record);
    }

    // ── Undo bookkeeping ────────────────────────────────────────────────────

    /// Enroll a successfully deleted record for undo.
    pub fn enroll_undo(&mut self, record: HistoryRecord, expires_at: Instant, abort: AbortHandle) {
        self.pending_undo.insert(
            record.video_id.clone(),
            PendingUndo {
                record,
                expires_at,
                abort: Some(abort),
            },
        );
    }

    /// The undo window elapsed for one record: it is permanently gone from
    /// the undo set.  No-op when a restore already cleared it.
    pub fn expire_undo(&mut self, video_id: &str) {
        if self.pending_undo.remove(video_id).is_some() {
            debug!("[history] undo window expired for {}", video_id);
        }
    }

    /// Abort every pending expiry timer and return the enrolled ids, leaving
    /// the entries in place.  Must run before the restore calls are spawned:
    /// an expiry firing after the restore settled would drop a retryable
    /// entry.  On restore failure the entries stay enrolled (without timers)
    /// so the user can retry.
    pub fn arm_undo(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (id, entry) in self.pending_undo.iter_mut() {
            if let Some(handle) = entry.abort.take() {
                handle.abort();
            }
            ids.push(id.clone());
        }
        ids
    }

    /// Restore succeeded for all `ids`: clear them from the undo set.
    pub fn clear_undo(&mut self, ids: &[String]) {
        for id in ids {
            self.pending_undo.remove(id);
        }
    }

    pub fn has_pending_undo(&self) -> bool {
        !self.pending_undo.is_empty()
    }

    /// Entries for the undo banner: (video_id, title, expires_at).
    pub fn pending_undo_view(&self) -> Vec<(&str, &str, Instant)> {
        let mut v: Vec<(&str, &str, Instant)> = self
            .pending_undo
            .values()
            .map(|p| (p.record.video_id.as_str(), p.record.title.as_str(), p.expires_at))
            .collect();
        v.sort_by_key(|(_, _, exp)| *exp);
        v
    }

    // ── Favorites ───────────────────────────────────────────────────────────

    /// Desired favorite state to send for a toggle: the negation of the
    /// current flag, as an explicit value.  The local record is left
    /// untouched until the authoritative refresh lands.
    pub fn negated_favorite(&self, video_id: &str) -> Option<bool> {
        self.find(video_id).map(|r| !r.is_favorite)
    }
}

impl Default for HistoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(video_id: &str, title: &str) -> HistoryRecord {
        HistoryRecord {
            id: format!("id-{video_id}"),
            video_id: video_id.to_string(),
            title: title.to_string(),
            loop_duration: 3,
            user_id: None,
            play_count: 1,
            created_at: None,
            last_played_at: None,
            is_favorite: false,
            is_deleted: false,
        }
    }

    fn seeded() -> HistoryCoordinator {
        let mut c = HistoryCoordinator::new();
        let seq = c.begin_refresh();
        c.apply_refresh(seq, Ok(vec![record("aaa", "A"), record("bbb", "B"), record("ccc", "C")]));
        c
    }

    #[test]
    fn test_refresh_replaces_wholesale() {
        let mut c = seeded();
        let seq = c.begin_refresh();
        c.apply_refresh(seq, Ok(vec![record("zzz", "Z")]));
        assert_eq!(c.records().len(), 1);
        assert_eq!(c.records()[0].video_id, "zzz");
    }

    #[test]
    fn test_stale_refresh_is_discarded() {
        let mut c = HistoryCoordinator::new();
        let old = c.begin_refresh();
        let new = c.begin_refresh();
        assert!(c.apply_refresh(new, Ok(vec![record("new", "N")])));
        // The slower, older fetch settles afterwards and must not win.
        assert!(!c.apply_refresh(old, Ok(vec![record("old", "O")])));
        assert_eq!(c.records()[0].video_id, "new");
    }

    #[test]
    fn test_optimistic_remove_then_reinsert_appends() {
        let mut c = seeded();
        let snapshot = c.remove_local("aaa").expect("record exists");
        assert!(c.find("aaa").is_none());

        // Failed delete: compensating re-insert appends at the end.
        c.reinsert(snapshot);
        assert_eq!(c.records().last().unwrap().video_id, "aaa");
    }

    #[test]
    fn test_reinsert_skips_when_refresh_already_restored() {
        let mut c = seeded();
        let snapshot = c.remove_local("bbb").unwrap();
        let seq = c.begin_refresh();
        c.apply_refresh(seq, Ok(vec![record("bbb", "B")]));
        c.reinsert(snapshot);
        assert_eq!(c.records().iter().filter(|r| r.video_id == "bbb").count(), 1);
    }

    #[tokio::test]
    async fn test_undo_enroll_expire_lifecycle() {
        let mut c = seeded();
        let rec = c.remove_local("aaa").unwrap();
        let abort = tokio::spawn(async {}).abort_handle();
        c.enroll_undo(rec, Instant::now() + Duration::from_secs(UNDO_WINDOW_SECS), abort);
        assert!(c.has_pending_undo());

        c.expire_undo("aaa");
        assert!(!c.has_pending_undo());
        // Undo is no longer offered after expiry.
        assert!(c.arm_undo().is_empty());
    }

    #[tokio::test]
    async fn test_undo_arm_keeps_entries_until_cleared() {
        let mut c = seeded();
        for id in ["aaa", "bbb"] {
            let rec = c.remove_local(id).unwrap();
            let abort = tokio::spawn(async {}).abort_handle();
            c.enroll_undo(rec, Instant::now() + Duration::from_secs(UNDO_WINDOW_SECS), abort);
        }

        let mut ids = c.arm_undo();
        ids.sort();
        assert_eq!(ids, vec!["aaa".to_string(), "bbb".to_string()]);
        // Entries survive arming so a failed restore can be retried...
        assert!(c.has_pending_undo());
        // ...and a late expiry for an armed entry is a no-op for the rest.
        c.expire_undo("aaa");
        assert!(c.has_pending_undo());

        c.clear_undo(&["bbb".to_string()]);
        assert!(!c.has_pending_undo());
    }

    #[test]
    fn test_negated_favorite_is_explicit_desired_state() {
        let mut c = seeded();
        assert_eq!(c.negated_favorite("aaa"), Some(true));
        // The local flag stays untouched until a refresh confirms, so a
        // repeated toggle sends the same desired state (idempotent).
        assert_eq!(c.negated_favorite("aaa"), Some(true));
        assert_eq!(c.negated_favorite("nope"), None);

        let seq = c.begin_refresh();
        let mut favored = record("aaa", "A");
        favored.is_favorite = true;
        c.apply_refresh(seq, Ok(vec![favored]));
        assert_eq!(c.negated_favorite("aaa"), Some(false));
    }

    #[test]
    fn test_refresh_error_keeps_previous_records() {
        let mut c = seeded();
        let seq = c.begin_refresh();
        c.apply_refresh(seq, Err("boom".to_string()));
        assert_eq!(c.records().len(), 3);
        assert_eq!(c.error.as_deref(), Some("boom"));
    }
}
