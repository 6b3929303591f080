//! Backend registry and deterministic selection.
//!
//! The set of backends is closed and registered at compile time. Selection
//! probes every candidate (read-only) and picks the highest confidence,
//! tie-broken by static priority. An explicit override — `requested`
//! argument or the `KEYRGB_BACKEND` environment variable — short-circuits:
//! a named backend that is unknown or probes unavailable yields *no* backend
//! rather than a silent fallback.

use tracing::debug;

use crate::ite8291r3::Ite8291r3Backend;
use crate::sysfs_leds::SysfsLedsBackend;
use crate::{Backend, ProbeResult};

/// Factory entry for one backend implementation.
pub struct BackendSpec {
    pub name: &'static str,
    pub priority: i32,
    pub factory: fn() -> Box<dyn Backend>,
}

/// The default compile-time backend set, highest priority first.
pub fn default_specs() -> Vec<BackendSpec> {
    vec![
        BackendSpec {
            name: Ite8291r3Backend::NAME,
            priority: Ite8291r3Backend::PRIORITY,
            factory: || Box::new(Ite8291r3Backend::new()),
        },
        BackendSpec {
            name: SysfsLedsBackend::NAME,
            priority: SysfsLedsBackend::PRIORITY,
            factory: || Box::new(SysfsLedsBackend::new()),
        },
    ]
}

/// Outcome of a successful selection.
pub struct Selection {
    pub backend: Box<dyn Backend>,
    pub probe: ProbeResult,
}

/// Select a backend.
///
/// Precedence: explicit `requested` > `KEYRGB_BACKEND` env > auto. The value
/// `auto` (or empty) means no override. Returns `None` when nothing usable is
/// found, including when an explicitly requested backend is unavailable.
pub fn select_backend(requested: Option<&str>) -> Option<Selection> {
    let env = std::env::var("KEYRGB_BACKEND").ok();
    let req = requested
        .map(str::to_string)
        .or(env)
        .unwrap_or_else(|| "auto".to_string())
        .trim()
        .to_ascii_lowercase();

    let backends = default_specs()
        .into_iter()
        .map(|spec| (spec.factory)())
        .collect();
    select_from_backends(&req, backends)
}

/// Selection core over instantiated backends; split out for tests.
pub fn select_from_backends(
    requested: &str,
    backends: Vec<Box<dyn Backend>>,
) -> Option<Selection> {
    if !requested.is_empty() && requested != "auto" {
        for backend in backends {
            if backend.name().eq_ignore_ascii_case(requested) {
                let probe = backend.probe();
                if !probe.available {
                    debug!(
                        backend = backend.name(),
                        reason = %probe.reason,
                        "requested backend unavailable"
                    );
                    return None;
                }
                debug!(backend = backend.name(), "backend selected (requested)");
                return Some(Selection { backend, probe });
            }
        }
        debug!(requested, "unknown backend requested");
        return None;
    }

    let mut candidates: Vec<(ProbeResult, Box<dyn Backend>)> = Vec::new();
    for backend in backends {
        let probe = backend.probe();
        debug!(
            backend = backend.name(),
            available = probe.available,
            confidence = probe.confidence,
            reason = %probe.reason,
            "backend probe"
        );
        if probe.available {
            candidates.push((probe, backend));
        }
    }

    // Highest confidence wins; priority is the tiebreaker.
    candidates.sort_by_key(|(probe, backend)| {
        (
            std::cmp::Reverse(probe.confidence),
            std::cmp::Reverse(backend.priority()),
        )
    });

    candidates
        .into_iter()
        .next()
        .map(|(probe, backend)| Selection { backend, probe })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn fake(
        name: &'static str,
        priority: i32,
        available: bool,
        confidence: u8,
    ) -> Box<dyn Backend> {
        Box::new(MockBackend::named(name, priority).with_probe(available, confidence))
    }

    fn pick(requested: &str, backends: Vec<Box<dyn Backend>>) -> Option<&'static str> {
        select_from_backends(requested, backends).map(|s| s.backend.name())
    }

    #[test]
    fn test_highest_confidence_wins() {
        let picked = pick(
            "auto",
            vec![fake("a", 10, true, 90), fake("b", 100, true, 40)],
        );
        assert_eq!(picked, Some("a"));
    }

    #[test]
    fn test_priority_breaks_ties() {
        let picked = pick(
            "auto",
            vec![fake("low", 10, true, 70), fake("high", 100, true, 70)],
        );
        assert_eq!(picked, Some("high"));
    }

    #[test]
    fn test_unavailable_filtered() {
        let picked = pick(
            "auto",
            vec![fake("a", 10, false, 95), fake("b", 5, true, 10)],
        );
        assert_eq!(picked, Some("b"));
    }

    #[test]
    fn test_requested_unavailable_is_no_backend() {
        // Explicit request for an unavailable backend must not fall back.
        let picked = pick(
            "sysfs-leds",
            vec![
                fake("ite8291r3", 100, true, 90),
                fake("sysfs-leds", 80, false, 0),
            ],
        );
        assert_eq!(picked, None);
    }

    #[test]
    fn test_requested_unknown_is_no_backend() {
        let picked = pick("openrgb", vec![fake("ite8291r3", 100, true, 90)]);
        assert_eq!(picked, None);
    }

    #[test]
    fn test_requested_available_selected() {
        let picked = pick(
            "sysfs-leds",
            vec![
                fake("ite8291r3", 100, true, 90),
                fake("sysfs-leds", 80, true, 40),
            ],
        );
        assert_eq!(picked, Some("sysfs-leds"));
    }

    #[test]
    fn test_requested_name_case_insensitive() {
        let picked = pick("ITE8291R3", vec![fake("ite8291r3", 100, true, 90)]);
        assert_eq!(picked, Some("ite8291r3"));
    }

    #[test]
    fn test_nothing_available() {
        let picked = pick("auto", vec![fake("a", 10, false, 0)]);
        assert_eq!(picked, None);
    }
}
