//! Lighting intents and the brightness model.
//!
//! An intent is the single authoritative "what should the keyboard show"
//! value. Exactly one intent is active at a time; applying a new one replaces
//! the previous one atomically (the render thread never blends two intents
//! into one frame).

use std::time::{Duration, Instant};

use keyrgb_backend::{PerKeyMap, Rgb, BRIGHTNESS_MAX};

/// Software-rendered effect family. Hardware effects are selected by name
/// and validated by the backend instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareEffectKind {
    SpectrumCycle,
    RainbowWave,
    RainbowSwirl,
    ColorCycle,
    Chase,
    Twinkle,
    Strobe,
    ReactiveFade,
    ReactiveRipple,
}

impl SoftwareEffectKind {
    pub const ALL: [SoftwareEffectKind; 9] = [
        Self::SpectrumCycle,
        Self::RainbowWave,
        Self::RainbowSwirl,
        Self::ColorCycle,
        Self::Chase,
        Self::Twinkle,
        Self::Strobe,
        Self::ReactiveFade,
        Self::ReactiveRipple,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SpectrumCycle => "spectrum_cycle",
            Self::RainbowWave => "rainbow_wave",
            Self::RainbowSwirl => "rainbow_swirl",
            Self::ColorCycle => "color_cycle",
            Self::Chase => "chase",
            Self::Twinkle => "twinkle",
            Self::Strobe => "strobe",
            Self::ReactiveFade => "reactive_fade",
            Self::ReactiveRipple => "reactive_ripple",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    /// Reactive effects render key-press pulses instead of a free-running
    /// animation.
    pub fn is_reactive(self) -> bool {
        matches!(self, Self::ReactiveFade | Self::ReactiveRipple)
    }

    /// Effects that need a per-key matrix; on uniform-only hardware these
    /// degrade to their average color.
    pub fn needs_per_key(self) -> bool {
        !matches!(self, Self::SpectrumCycle | Self::ColorCycle | Self::Strobe)
    }

    /// Base frame interval at speed 1 in milliseconds. The UI speed scales
    /// this down; see [`frame_interval`].
    pub fn base_interval_ms(self) -> u64 {
        match self {
            Self::SpectrumCycle | Self::ColorCycle => 50,
            Self::RainbowWave | Self::RainbowSwirl => 60,
            Self::Chase => 60,
            Self::Twinkle => 70,
            Self::Strobe => 45,
            Self::ReactiveFade | Self::ReactiveRipple => 33,
        }
    }
}

/// Map a 0..=10 UI speed to the frame interval for one software effect.
///
/// Interval = base * clamp(11 - speed, 1, 11) * 0.8, floored at 15 ms so a
/// maxed-out speed cannot saturate a CPU core.
pub fn frame_interval(kind: SoftwareEffectKind, speed: u8) -> Duration {
    let steps = (11i64 - i64::from(speed)).clamp(1, 11) as u64;
    let ms = (kind.base_interval_ms() * steps * 8 / 10).max(15);
    Duration::from_millis(ms)
}

/// Map a 0..=10 UI speed to an animation pace multiplier (quadratic,
/// 0.25x at speed 0 through 10x at speed 10, 1.0x at the default speed 5).
pub fn speed_pace(speed: u8) -> f32 {
    let s = f32::from(speed.min(10)) / 10.0;
    if s <= 0.5 {
        0.25 + (1.0 - 0.25) * (s / 0.5) * (s / 0.5)
    } else {
        let t = (s - 0.5) / 0.5;
        1.0 + (10.0 - 1.0) * t * t
    }
}

/// What the keyboard should currently display.
#[derive(Debug, Clone, PartialEq)]
pub enum LightingIntent {
    /// Firmware-resident effect, animated by the controller itself.
    HardwareEffect {
        name: String,
        speed: u8,
        color: Option<Rgb>,
    },
    /// Host-rendered effect, one frame per tick.
    SoftwareEffect {
        kind: SoftwareEffectKind,
        speed: u8,
        color: Rgb,
    },
    /// A single color across the whole keyboard.
    StaticColor(Rgb),
    /// An explicit per-key frame (profile layouts).
    PerKey(PerKeyMap),
    /// Backlight off.
    Off,
}

impl LightingIntent {
    pub fn describe(&self) -> String {
        match self {
            Self::HardwareEffect { name, speed, .. } => format!("hw:{name}@{speed}"),
            Self::SoftwareEffect { kind, speed, .. } => format!("sw:{}@{speed}", kind.name()),
            Self::StaticColor(rgb) => format!("static:{}", rgb.to_hex()),
            Self::PerKey(map) => format!("per-key:{} keys", map.len()),
            Self::Off => "off".to_string(),
        }
    }
}

/// An in-flight brightness fade.
#[derive(Debug, Clone, Copy)]
pub struct Fade {
    pub from: u8,
    pub started: Instant,
    pub duration: Duration,
}

/// Brightness as three layers: the user's set level, an optional policy
/// override (battery dim, screen-off dim), and an optional fade between
/// them. The effective level is recomputed every render tick so fades stay
/// smooth without extra threads.
#[derive(Debug, Clone)]
pub struct BrightnessState {
    pub user: u8,
    pub policy_override: Option<u8>,
    fade: Option<Fade>,
}

impl BrightnessState {
    pub fn new(user: u8) -> Self {
        Self {
            user: user.min(BRIGHTNESS_MAX),
            policy_override: None,
            fade: None,
        }
    }

    /// The level writes should target once any fade completes.
    pub fn target(&self) -> u8 {
        self.policy_override.unwrap_or(self.user)
    }

    /// The level to write right now, interpolating a fade if one is active.
    pub fn effective(&self, now: Instant) -> u8 {
        let target = self.target();
        match self.fade {
            Some(fade) => {
                let elapsed = now.saturating_duration_since(fade.started);
                if elapsed >= fade.duration {
                    target
                } else {
                    let t = elapsed.as_secs_f32() / fade.duration.as_secs_f32();
                    let level =
                        f32::from(fade.from) + (f32::from(target) - f32::from(fade.from)) * t;
                    level.round().clamp(0.0, f32::from(BRIGHTNESS_MAX)) as u8
                }
            }
            None => target,
        }
    }

    pub fn fade_active(&self, now: Instant) -> bool {
        self.fade
            .map(|f| now.saturating_duration_since(f.started) < f.duration)
            .unwrap_or(false)
    }

    /// Start fading from `from` toward the current target. `from` must be
    /// captured via [`Self::effective`] *before* the target is changed, or
    /// the fade collapses into a jump.
    pub fn begin_fade(&mut self, from: u8, now: Instant, duration: Duration) {
        if from == self.target() || duration.is_zero() {
            self.fade = None;
            return;
        }
        self.fade = Some(Fade {
            from,
            started: now,
            duration,
        });
    }

    pub fn cancel_fade(&mut self) {
        self.fade = None;
    }
}
