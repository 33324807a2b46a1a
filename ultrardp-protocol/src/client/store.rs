//! Most-recent-wins frame store
//!
//! The single buffer between the client's network task and its display
//! task. Exactly one slot per local monitor id; a late frame replaces the
//! earlier one in place. Deliberately not a queue: a queue would grow a
//! backlog under decode slowness and end up needing a drop policy
//! equivalent to this.

use crate::monitor::MonitorMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared per-monitor latest-frame buffer
///
/// The mutex is held only for the copy-in or clone-out, never across
/// decode or rendering.
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    inner: Arc<Mutex<HashMap<u32, Vec<u8>>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `payload` into the slot for `monitor_id`, replacing any
    /// previous frame. The copy is mandatory: callers reuse their receive
    /// buffers and stored frames must never alias them.
    pub fn store(&self, monitor_id: u32, payload: &[u8]) {
        let frame = payload.to_vec();
        let mut slots = self.inner.lock().unwrap();
        slots.insert(monitor_id, frame);
    }

    /// Clone out the latest frame for `monitor_id`, if any
    pub fn latest(&self, monitor_id: u32) -> Option<Vec<u8>> {
        let slots = self.inner.lock().unwrap();
        slots.get(&monitor_id).cloned()
    }

    /// Drop slots whose local monitor id is no longer the target of any
    /// mapping; used after a topology change.
    pub fn retain_mapped(&self, map: &MonitorMap) {
        let mut slots = self.inner.lock().unwrap();
        slots.retain(|local_id, _| map.values().any(|target| target == local_id));
    }

    pub fn monitor_ids(&self) -> Vec<u32> {
        let slots = self.inner.lock().unwrap();
        let mut ids: Vec<u32> = slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
