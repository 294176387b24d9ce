//! Last-known progress for every task and subtask, plus the project aggregate.
//!
//! The cache is a disposable view over the append-only progress records held
//! by the remote authority. Every write carries a sequence number taken from
//! one monotonic counter; a write older than the last one applied to the same
//! entity is discarded, so a slow refresh can never overwrite a newer
//! optimistic edit or a newer refresh.
//!
//! A value written by [`ProgressCache::set_pending`] stays pending until its
//! remote append settles. Refreshes skip pending entries whatever their
//! sequence, since the authority cannot report a record it has not stored yet.

use crate::error::EngineError;
use crate::model::{clamp_percent, EntityRef};
use std::collections::HashMap;
use tracing::debug;

/// Monotonic sequence number attached to every cache write.
pub type Sequence = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    percent: u8,
    sequence: Sequence,
    /// Appends issued for this entity that have not settled yet.
    pending: u32,
}

/// Outcome of a versioned bulk merge.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Entities whose value was replaced.
    pub applied: usize,
    /// One `EngineError::Stale` per discarded entry.
    pub discarded: Vec<EngineError>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.discarded.is_empty()
    }
}

/// Progress cache keyed by entity.
#[derive(Debug, Default)]
pub struct ProgressCache {
    entries: HashMap<EntityRef, Entry>,
    project: Option<(f64, Sequence)>,
    next_sequence: Sequence,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next sequence number.
    ///
    /// Callers take one before issuing a remote refresh and pass it back to
    /// [`merge`](Self::merge) when the response lands.
    pub fn issue_sequence(&mut self) -> Sequence {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Current percent for an entity, 0 if unknown.
    pub fn get(&self, entity: EntityRef) -> u8 {
        self.entries.get(&entity).map_or(0, |e| e.percent)
    }

    /// Whether the cache holds any value for the entity.
    pub fn contains(&self, entity: EntityRef) -> bool {
        self.entries.contains_key(&entity)
    }

    /// Optimistic local write. Always wins over anything issued earlier.
    ///
    /// Returns the stored (clamped) percent.
    pub fn set(&mut self, entity: EntityRef, percent: i64) -> u8 {
        let percent = clamp_percent(percent);
        let sequence = self.issue_sequence();
        let pending = self.entries.get(&entity).map_or(0, |e| e.pending);
        self.entries.insert(
            entity,
            Entry {
                percent,
                sequence,
                pending,
            },
        );
        percent
    }

    /// Optimistic write backed by a remote append that has not resolved yet.
    ///
    /// Returns the stored percent and the write's sequence, which must be
    /// handed back to [`settle`](Self::settle) once the append resolves.
    pub fn set_pending(&mut self, entity: EntityRef, percent: i64) -> (u8, Sequence) {
        let percent = clamp_percent(percent);
        let sequence = self.issue_sequence();
        let pending = self.entries.get(&entity).map_or(0, |e| e.pending) + 1;
        self.entries.insert(
            entity,
            Entry {
                percent,
                sequence,
                pending,
            },
        );
        (percent, sequence)
    }

    /// Mark one append for `entity` as resolved.
    ///
    /// `stored` is the percent the authority recorded, or `None` if the
    /// append failed. A recorded value replaces the cached one only when no
    /// newer local write happened since `written`; a failed append keeps the
    /// optimistic value until the next refresh reconciles it.
    pub fn settle(&mut self, entity: EntityRef, written: Sequence, stored: Option<u8>) {
        let sequence = self.issue_sequence();
        let Some(entry) = self.entries.get_mut(&entity) else {
            return;
        };
        entry.pending = entry.pending.saturating_sub(1);
        if let Some(percent) = stored {
            if entry.sequence == written {
                entry.percent = percent.min(100);
                entry.sequence = sequence;
            }
        }
    }

    /// Whether an append for the entity is still unresolved.
    pub fn is_pending(&self, entity: EntityRef) -> bool {
        self.entries.get(&entity).is_some_and(|e| e.pending > 0)
    }

    /// Apply one value tagged with the sequence it was requested under.
    pub fn apply(
        &mut self,
        entity: EntityRef,
        percent: i64,
        sequence: Sequence,
    ) -> Result<(), EngineError> {
        if let Some(existing) = self.entries.get(&entity) {
            if existing.pending > 0 || sequence < existing.sequence {
                return Err(EngineError::Stale {
                    entity,
                    sequence,
                    applied: existing.sequence,
                });
            }
        }
        self.entries.insert(
            entity,
            Entry {
                percent: clamp_percent(percent),
                sequence,
                pending: 0,
            },
        );
        Ok(())
    }

    /// Bulk replace values for a batch of entities.
    ///
    /// Entries older than what is already applied, or pending a local append,
    /// are skipped individually; the rest of the batch still lands.
    pub fn merge<I>(&mut self, values: I, sequence: Sequence) -> MergeOutcome
    where
        I: IntoIterator<Item = (EntityRef, i64)>,
    {
        let mut outcome = MergeOutcome::default();
        for (entity, percent) in values {
            match self.apply(entity, percent, sequence) {
                Ok(()) => outcome.applied += 1,
                Err(stale) => {
                    debug!("Discarding stale progress: {}", stale);
                    outcome.discarded.push(stale);
                }
            }
        }
        outcome
    }

    /// Project aggregate as last reported by the remote authority.
    pub fn project_progress(&self) -> f64 {
        self.project.map_or(0.0, |(value, _)| value)
    }

    /// Store the project aggregate if `sequence` is not older than the last
    /// applied one. Returns whether the value was stored.
    pub fn set_project_progress(&mut self, value: f64, sequence: Sequence) -> bool {
        match self.project {
            Some((_, applied)) if sequence < applied => {
                debug!(
                    "Discarding stale project progress (seq {} < {})",
                    sequence, applied
                );
                false
            }
            _ => {
                self.project = Some((value.clamp(0.0, 100.0), sequence));
                true
            }
        }
    }

    /// Drop everything, e.g. before a full project reload.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.project = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_defaults_to_zero() {
        let cache = ProgressCache::new();
        assert_eq!(cache.get(EntityRef::task(1)), 0);
        assert!(!cache.contains(EntityRef::task(1)));
    }

    #[test]
    fn test_set_clamps() {
        let mut cache = ProgressCache::new();
        assert_eq!(cache.set(EntityRef::subtask(1), -5), 0);
        assert_eq!(cache.set(EntityRef::subtask(2), 150), 100);
        assert_eq!(cache.get(EntityRef::subtask(1)), 0);
        assert_eq!(cache.get(EntityRef::subtask(2)), 100);
    }

    #[test]
    fn test_read_after_set_reflects_latest_set() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::subtask(4);
        cache.set(e, 10);
        cache.set(e, 70);
        assert_eq!(cache.get(e), 70);
    }

    #[test]
    fn test_task_and_subtask_keys_do_not_collide() {
        let mut cache = ProgressCache::new();
        cache.set(EntityRef::task(1), 30);
        cache.set(EntityRef::subtask(1), 90);
        assert_eq!(cache.get(EntityRef::task(1)), 30);
        assert_eq!(cache.get(EntityRef::subtask(1)), 90);
    }

    // =========================================================================
    // Versioning
    // =========================================================================

    #[test]
    fn test_refresh_issued_before_local_edit_is_discarded() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::subtask(1);
        let refresh_seq = cache.issue_sequence();
        cache.set(e, 80);

        let outcome = cache.merge([(e, 20)], refresh_seq);
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.discarded.len(), 1);
        assert!(matches!(outcome.discarded[0], EngineError::Stale { .. }));
        assert_eq!(cache.get(e), 80);
    }

    #[test]
    fn test_older_response_resolving_last_does_not_win() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::task(2);
        let first = cache.issue_sequence();
        let second = cache.issue_sequence();

        assert!(cache.merge([(e, 60)], second).is_clean());
        let late = cache.merge([(e, 40)], first);
        assert!(!late.is_clean());
        assert_eq!(cache.get(e), 60);
    }

    #[test]
    fn test_merge_applies_fresh_entries_and_skips_stale_ones() {
        let mut cache = ProgressCache::new();
        let seq = cache.issue_sequence();
        cache.set(EntityRef::subtask(1), 50);

        let outcome = cache.merge(
            [
                (EntityRef::subtask(1), 10),
                (EntityRef::subtask(2), 20),
                (EntityRef::task(1), 15),
            ],
            seq,
        );
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(cache.get(EntityRef::subtask(1)), 50);
        assert_eq!(cache.get(EntityRef::subtask(2)), 20);
    }

    #[test]
    fn test_refresh_after_pending_write_keeps_optimistic_value() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::subtask(201);
        let (stored, _) = cache.set_pending(e, 70);
        assert_eq!(stored, 70);

        // Issued after the write, but the append has not reached the authority
        let refresh_seq = cache.issue_sequence();
        let outcome = cache.merge([(e, 0), (EntityRef::subtask(202), 30)], refresh_seq);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(cache.get(e), 70);
        assert!(cache.is_pending(e));
    }

    #[test]
    fn test_settle_writes_recorded_value_and_reopens_entry() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::task(3);
        let (_, written) = cache.set_pending(e, 150);
        cache.settle(e, written, Some(100));
        assert!(!cache.is_pending(e));
        assert_eq!(cache.get(e), 100);

        let seq = cache.issue_sequence();
        assert!(cache.apply(e, 40, seq).is_ok());
        assert_eq!(cache.get(e), 40);
    }

    #[test]
    fn test_failed_append_keeps_value_until_refresh() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::subtask(9);
        let (_, written) = cache.set_pending(e, 60);
        cache.settle(e, written, None);
        assert_eq!(cache.get(e), 60);

        let seq = cache.issue_sequence();
        assert!(cache.merge([(e, 0)], seq).is_clean());
        assert_eq!(cache.get(e), 0);
    }

    #[test]
    fn test_overlapping_appends_stay_pending_until_all_settle() {
        let mut cache = ProgressCache::new();
        let e = EntityRef::subtask(5);
        let (_, first) = cache.set_pending(e, 20);
        let (_, second) = cache.set_pending(e, 80);

        // The older append resolving must not clobber the newer write
        cache.settle(e, first, Some(20));
        assert_eq!(cache.get(e), 80);
        assert!(cache.is_pending(e));

        cache.settle(e, second, Some(80));
        assert!(!cache.is_pending(e));
        assert_eq!(cache.get(e), 80);
    }

    #[test]
    fn test_equal_sequence_is_applied() {
        let mut cache = ProgressCache::new();
        let seq = cache.issue_sequence();
        assert!(cache.apply(EntityRef::task(1), 10, seq).is_ok());
        assert!(cache.apply(EntityRef::task(1), 12, seq).is_ok());
        assert_eq!(cache.get(EntityRef::task(1)), 12);
    }

    #[test]
    fn test_project_progress_versioned() {
        let mut cache = ProgressCache::new();
        let old = cache.issue_sequence();
        let new = cache.issue_sequence();
        assert!(cache.set_project_progress(55.5, new));
        assert!(!cache.set_project_progress(10.0, old));
        assert!((cache.project_progress() - 55.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear() {
        let mut cache = ProgressCache::new();
        cache.set(EntityRef::task(1), 10);
        let seq = cache.issue_sequence();
        cache.set_project_progress(5.0, seq);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.project_progress(), 0.0);
    }
}
