//! Reactive input adapter.
//!
//! Key events arrive from an external collaborator (evdev bridge, test
//! driver) as string key identifiers plus an intensity. The adapter resolves
//! identifiers to matrix positions through the active profile keymap,
//! coalesces bursts so the render thread sees at most one stimulus per key
//! per frame, and tracks idle time for the synthetic-pulse fallback.

use std::collections::HashMap;
use std::time::Instant;

use keyrgb_backend::KeyPos;
use parking_lot::Mutex;
use tracing::trace;

/// One coalesced key stimulus. `pos` is `None` when the key identifier is
/// not in the keymap; reactive effects render those as a global flash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stimulus {
    pub pos: Option<KeyPos>,
    pub intensity: f32,
    pub at: Instant,
}

#[derive(Default)]
struct InputInner {
    keymap: HashMap<String, KeyPos>,
    pending: HashMap<Option<KeyPos>, Stimulus>,
    last_event: Option<Instant>,
}

/// Thread-safe event funnel between input sources and the render thread.
#[derive(Default)]
pub struct InputAdapter {
    inner: Mutex<InputInner>,
}

impl InputAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the key-id to matrix-position mapping (from a profile).
    pub fn set_keymap(&self, keymap: HashMap<String, KeyPos>) {
        self.inner.lock().keymap = keymap;
    }

    /// Record one key event. Zero-intensity events are dropped outright;
    /// repeated events for the same key within a frame keep only the latest.
    pub fn on_key_event(&self, key_id: &str, intensity: f32, now: Instant) {
        if intensity <= 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        let pos = inner.keymap.get(key_id).copied();
        if pos.is_none() {
            trace!(key_id, "key not in keymap, treating as global stimulus");
        }
        inner.last_event = Some(now);
        inner.pending.insert(
            pos,
            Stimulus {
                pos,
                intensity: intensity.min(1.0),
                at: now,
            },
        );
    }

    /// Take all pending stimuli. Called once per render tick.
    pub fn drain(&self) -> Vec<Stimulus> {
        let mut inner = self.inner.lock();
        let mut out: Vec<Stimulus> = inner.pending.drain().map(|(_, s)| s).collect();
        out.sort_by_key(|s| s.pos);
        out
    }

    /// Time since the last real key event, if any was ever seen.
    pub fn idle_since(&self, now: Instant) -> Option<std::time::Duration> {
        self.inner
            .lock()
            .last_event
            .map(|at| now.saturating_duration_since(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keymap() -> HashMap<String, KeyPos> {
        HashMap::from([("a".to_string(), (2, 1)), ("s".to_string(), (2, 2))])
    }

    #[test]
    fn test_resolves_known_keys() {
        let adapter = InputAdapter::new();
        adapter.set_keymap(keymap());
        let now = Instant::now();
        adapter.on_key_event("a", 1.0, now);

        let drained = adapter.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].pos, Some((2, 1)));
        assert!(adapter.drain().is_empty());
    }

    #[test]
    fn test_unknown_key_is_global() {
        let adapter = InputAdapter::new();
        adapter.set_keymap(keymap());
        adapter.on_key_event("f24", 0.8, Instant::now());

        let drained = adapter.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].pos, None);
    }

    #[test]
    fn test_burst_coalesces_per_key() {
        let adapter = InputAdapter::new();
        adapter.set_keymap(keymap());
        let now = Instant::now();
        adapter.on_key_event("a", 0.2, now);
        adapter.on_key_event("a", 0.9, now);
        adapter.on_key_event("s", 1.0, now);

        let drained = adapter.drain();
        assert_eq!(drained.len(), 2);
        let a = drained.iter().find(|s| s.pos == Some((2, 1))).unwrap();
        assert!((a.intensity - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_zero_intensity_dropped() {
        let adapter = InputAdapter::new();
        adapter.set_keymap(keymap());
        adapter.on_key_event("a", 0.0, Instant::now());
        assert!(adapter.drain().is_empty());
        assert!(adapter.idle_since(Instant::now()).is_none());
    }
}
