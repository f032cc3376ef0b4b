//! Live task registry: at most one running task per job in this instance.
//!
//! A slot is claimed before the task is spawned and released by generation
//! when the task ends, so a late release from an aborted task never frees a
//! slot that a newer task owns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;

use crate::job::JobId;

struct Slot {
    generation: u64,
    handle: Option<AbortHandle>,
}

#[derive(Default)]
pub(crate) struct TaskRegistry {
    next_generation: AtomicU64,
    slots: Mutex<HashMap<JobId, Slot>>,
}

impl TaskRegistry {
    fn slots(&self) -> MutexGuard<'_, HashMap<JobId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the slot for `id`. None if a task is already live for it.
    pub(crate) fn try_claim(&self, id: &JobId) -> Option<u64> {
        let mut slots = self.slots();
        if slots.contains_key(id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            id.clone(),
            Slot {
                generation,
                handle: None,
            },
        );
        Some(generation)
    }

    /// Attach the spawned task's handle. If the slot was released or taken
    /// over meanwhile, the task is aborted instead.
    pub(crate) fn attach(&self, id: &JobId, generation: u64, handle: AbortHandle) {
        let mut slots = self.slots();
        match slots.get_mut(id) {
            Some(slot) if slot.generation == generation => slot.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Free the slot if it still belongs to `generation`.
    pub(crate) fn release(&self, id: &JobId, generation: u64) {
        let mut slots = self.slots();
        if slots.get(id).is_some_and(|s| s.generation == generation) {
            slots.remove(id);
        }
    }

    /// Abort and forget the task for `id`, if any.
    pub(crate) fn abort(&self, id: &JobId) -> bool {
        let slot = self.slots().remove(id);
        match slot {
            Some(slot) => {
                if let Some(handle) = slot.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn abort_all(&self) -> usize {
        let drained: Vec<Slot> = self.slots().drain().map(|(_, s)| s).collect();
        for slot in &drained {
            if let Some(handle) = &slot.handle {
                handle.abort();
            }
        }
        drained.len()
    }

    pub(crate) fn contains(&self, id: &JobId) -> bool {
        self.slots().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn one_claim_per_job() {
        let reg = TaskRegistry::default();
        let id = JobId::from("job_1_a");
        let generation = reg.try_claim(&id).unwrap();
        assert!(reg.try_claim(&id).is_none());
        assert_eq!(reg.len(), 1);

        reg.release(&id, generation);
        assert!(!reg.contains(&id));
        assert!(reg.try_claim(&id).is_some());
    }

    #[test]
    fn stale_release_keeps_newer_slot() {
        let reg = TaskRegistry::default();
        let id = JobId::from("job_1_a");
        let old = reg.try_claim(&id).unwrap();
        assert!(reg.abort(&id));
        let new = reg.try_claim(&id).unwrap();
        reg.release(&id, old);
        assert!(reg.contains(&id));
        reg.release(&id, new);
        assert!(!reg.contains(&id));
    }

    #[tokio::test]
    async fn abort_all_stops_tasks() {
        let reg = TaskRegistry::default();
        let id = JobId::from("job_1_a");
        let generation = reg.try_claim(&id).unwrap();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        reg.attach(&id, generation, task.abort_handle());

        assert_eq!(reg.abort_all(), 1);
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(reg.len(), 0);
    }

    #[tokio::test]
    async fn attach_after_release_aborts_the_task() {
        let reg = TaskRegistry::default();
        let id = JobId::from("job_1_a");
        let generation = reg.try_claim(&id).unwrap();
        reg.release(&id, generation);
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        reg.attach(&id, generation, task.abort_handle());
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
