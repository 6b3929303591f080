//! Diagnostics snapshot for `keyrgb diagnose` and bug reports.

use std::collections::BTreeMap;

use keyrgb_backend::{default_specs, Capabilities};
use serde::Serialize;

/// Point-in-time view of engine and backend state. Serialized as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub backend: Option<String>,
    pub connected: bool,
    pub capabilities: Option<Capabilities>,
    pub intent: String,
    pub brightness_user: u8,
    pub brightness_effective: u8,
    pub policy_override: Option<u8>,
    pub on_battery: bool,
    pub last_error: Option<String>,
}

/// One backend's probe outcome, for `keyrgb backends`.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub name: String,
    pub priority: i32,
    pub available: bool,
    pub confidence: u8,
    pub reason: String,
    pub identifiers: BTreeMap<String, String>,
}

/// Probe every registered backend without opening any device.
pub fn probe_all() -> Vec<BackendReport> {
    default_specs()
        .into_iter()
        .map(|spec| {
            let backend = (spec.factory)();
            let probe = backend.probe();
            BackendReport {
                name: spec.name.to_string(),
                priority: spec.priority,
                available: probe.available,
                confidence: probe.confidence,
                reason: probe.reason,
                identifiers: probe.identifiers,
            }
        })
        .collect()
}
