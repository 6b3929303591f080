//! AC adapter monitoring via the kernel power_supply class.
//!
//! Scans `/sys/class/power_supply` for a `Mains` supply and polls its
//! `online` attribute, translating edges into [`PowerEvent`]s. This is the
//! only built-in power event source; desktops with logind/D-Bus integration
//! feed the engine directly instead.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::power::PowerEvent;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct AcMonitor {
    root: PathBuf,
}

impl AcMonitor {
    pub fn new() -> Self {
        let root = std::env::var_os("KEYRGB_POWER_SUPPLY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/sys/class/power_supply"));
        Self { root }
    }

    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Whether any mains supply reports online. `None` when no mains supply
    /// exists (desktop machines), in which case polling stays silent.
    pub fn on_ac(&self) -> Option<bool> {
        let entries = std::fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            let kind = std::fs::read_to_string(dir.join("type")).unwrap_or_default();
            if kind.trim() != "Mains" {
                continue;
            }
            let online = std::fs::read_to_string(dir.join("online")).ok()?;
            return Some(online.trim() == "1");
        }
        None
    }

    /// Poll until `running` clears, invoking `emit` on each AC edge.
    pub fn run(self, running: Arc<AtomicBool>, emit: impl Fn(PowerEvent)) {
        let mut last = self.on_ac();
        if let Some(on_ac) = last {
            info!(on_ac, "AC monitor started");
            if !on_ac {
                emit(PowerEvent::AcUnplugged);
            }
        } else {
            debug!(root = %self.root.display(), "no mains supply found, AC monitor idle");
        }
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
            let current = self.on_ac();
            if current != last {
                match current {
                    Some(true) => emit(PowerEvent::AcPlugged),
                    Some(false) => emit(PowerEvent::AcUnplugged),
                    None => {}
                }
                last = current;
            }
        }
    }
}

impl Default for AcMonitor {
    fn default() -> Self {
        Self::new()
    }
}
