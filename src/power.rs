//! Power and brightness policy.
//!
//! A pure state machine: power/session events go in, lighting actions come
//! out. It never touches hardware; the engine applies the actions through
//! its normal write path. Every decision takes an explicit `now` so tests
//! can drive the clock.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do when the session screen dims or the idle timeout fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimAction {
    /// Drop to `dim_brightness` until the screen comes back.
    Dim,
    /// Turn the backlight fully off until the screen comes back.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerPolicyConfig {
    pub enabled: bool,
    /// Brightness cap while on battery; `None` leaves battery alone.
    pub battery_brightness: Option<u8>,
    /// Level used by [`DimAction::Dim`].
    pub dim_brightness: u8,
    pub dim_action: DimAction,
    pub off_on_suspend: bool,
    pub restore_on_resume: bool,
    pub off_on_lid_close: bool,
    /// Ignore repeated transitions into the same state within this window.
    #[serde(with = "crate::config::duration_secs")]
    pub debounce: Duration,
    /// Ignore dim/idle events this soon after a resume.
    #[serde(with = "crate::config::duration_secs")]
    pub resume_grace: Duration,
    /// A manual brightness change this recent blocks automatic battery
    /// dimming (the user just expressed a preference).
    #[serde(with = "crate::config::duration_secs")]
    pub user_override_window: Duration,
}

impl Default for PowerPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            battery_brightness: Some(15),
            dim_brightness: 5,
            dim_action: DimAction::Dim,
            off_on_suspend: true,
            restore_on_resume: true,
            off_on_lid_close: true,
            debounce: Duration::from_secs(3),
            resume_grace: Duration::from_secs(2),
            user_override_window: Duration::from_secs(5),
        }
    }
}

/// Events delivered by external collaborators (sysfs poller, logind, a
/// session idle monitor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    AcPlugged,
    AcUnplugged,
    ScreenDimmed,
    ScreenRestored,
    IdleTimeout,
    SuspendPrepare,
    Resumed,
    LidClosed,
    LidOpened,
}

/// Actions the engine executes on the policy's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Install (or with `None`, clear) the policy brightness override.
    SetOverride { level: Option<u8>, fade: bool },
    /// Force the backlight off, remembering the current intent.
    TurnOff,
    /// Undo a previous `TurnOff`.
    Restore { fade: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerSource {
    Ac,
    Battery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LightState {
    Normal,
    Dimmed,
    Off,
}

/// The policy state machine. One instance lives inside the engine.
pub struct PowerPolicy {
    config: PowerPolicyConfig,
    source: PowerSource,
    light: LightState,
    last_source_change: Option<Instant>,
    last_user_brightness: Option<Instant>,
    resumed_at: Option<Instant>,
    /// Whether the backlight was already off (by user choice) when we
    /// suspended or closed the lid; if so, resume must not relight it.
    saved_was_off: Option<bool>,
}

impl PowerPolicy {
    pub fn new(config: PowerPolicyConfig) -> Self {
        Self {
            config,
            source: PowerSource::Ac,
            light: LightState::Normal,
            last_source_change: None,
            last_user_brightness: None,
            resumed_at: None,
            saved_was_off: None,
        }
    }

    /// Note a manual brightness change so battery dimming backs off.
    pub fn note_user_brightness(&mut self, now: Instant) {
        self.last_user_brightness = Some(now);
    }

    pub fn on_battery(&self) -> bool {
        self.source == PowerSource::Battery
    }

    /// Feed one event. `currently_off` reflects whether the engine's active
    /// intent is already Off, which suspend/lid handling must preserve.
    pub fn handle_event(
        &mut self,
        event: PowerEvent,
        now: Instant,
        currently_off: bool,
    ) -> Vec<PolicyAction> {
        if !self.config.enabled {
            return Vec::new();
        }
        debug!(?event, source = ?self.source, light = ?self.light, "power event");
        match event {
            PowerEvent::AcUnplugged => self.set_source(PowerSource::Battery, now),
            PowerEvent::AcPlugged => self.set_source(PowerSource::Ac, now),
            PowerEvent::ScreenDimmed | PowerEvent::IdleTimeout => self.screen_dim(now),
            PowerEvent::ScreenRestored => self.screen_restore(),
            PowerEvent::SuspendPrepare => self.sleep(currently_off, self.config.off_on_suspend),
            PowerEvent::LidClosed => self.sleep(currently_off, self.config.off_on_lid_close),
            PowerEvent::Resumed => self.wake(now, self.config.restore_on_resume),
            PowerEvent::LidOpened => self.wake(now, self.config.off_on_lid_close),
        }
    }

    fn set_source(&mut self, source: PowerSource, now: Instant) -> Vec<PolicyAction> {
        if self.source == source {
            return Vec::new();
        }
        if let Some(at) = self.last_source_change {
            if now.saturating_duration_since(at) < self.config.debounce {
                debug!("power source flapping, ignored");
                return Vec::new();
            }
        }
        self.source = source;
        self.last_source_change = Some(now);

        // A dimmed/off screen state owns the override until restore.
        if self.light != LightState::Normal {
            return Vec::new();
        }
        match source {
            PowerSource::Battery => match self.config.battery_brightness {
                Some(level) if !self.user_recently_adjusted(now) => {
                    vec![PolicyAction::SetOverride {
                        level: Some(level),
                        fade: true,
                    }]
                }
                _ => Vec::new(),
            },
            PowerSource::Ac => vec![PolicyAction::SetOverride {
                level: None,
                fade: true,
            }],
        }
    }

    fn user_recently_adjusted(&self, now: Instant) -> bool {
        self.last_user_brightness
            .map(|at| now.saturating_duration_since(at) < self.config.user_override_window)
            .unwrap_or(false)
    }

    fn screen_dim(&mut self, now: Instant) -> Vec<PolicyAction> {
        if self.light != LightState::Normal {
            return Vec::new();
        }
        if let Some(at) = self.resumed_at {
            if now.saturating_duration_since(at) < self.config.resume_grace {
                debug!("dim within resume grace, ignored");
                return Vec::new();
            }
        }
        match self.config.dim_action {
            DimAction::Dim => {
                self.light = LightState::Dimmed;
                vec![PolicyAction::SetOverride {
                    level: Some(self.config.dim_brightness),
                    fade: true,
                }]
            }
            DimAction::Off => {
                self.light = LightState::Off;
                vec![PolicyAction::TurnOff]
            }
        }
    }

    fn screen_restore(&mut self) -> Vec<PolicyAction> {
        let was = self.light;
        if was == LightState::Normal {
            return Vec::new();
        }
        self.light = LightState::Normal;

        let mut actions = Vec::new();
        if was == LightState::Off {
            actions.push(PolicyAction::Restore { fade: true });
        }
        // Back to the steady-state override for the current power source.
        let level = match self.source {
            PowerSource::Battery => self.config.battery_brightness,
            PowerSource::Ac => None,
        };
        actions.push(PolicyAction::SetOverride { level, fade: true });
        actions
    }

    fn sleep(&mut self, currently_off: bool, turn_off: bool) -> Vec<PolicyAction> {
        if self.light == LightState::Off && self.saved_was_off.is_some() {
            return Vec::new();
        }
        self.saved_was_off = Some(currently_off);
        if !turn_off {
            return Vec::new();
        }
        self.light = LightState::Off;
        if currently_off {
            Vec::new()
        } else {
            vec![PolicyAction::TurnOff]
        }
    }

    fn wake(&mut self, now: Instant, restore: bool) -> Vec<PolicyAction> {
        self.resumed_at = Some(now);
        let was_off = self.saved_was_off.take();
        self.light = LightState::Normal;

        // If the lights were off before we slept, honor that.
        if was_off == Some(true) || !restore {
            return Vec::new();
        }
        let mut actions = vec![PolicyAction::Restore { fade: true }];
        if self.source == PowerSource::Battery {
            if let Some(level) = self.config.battery_brightness {
                actions.push(PolicyAction::SetOverride {
                    level: Some(level),
                    fade: true,
                });
            }
        }
        actions
    }
}
