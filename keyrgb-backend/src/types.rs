//! Shared backend types: colors, capabilities, probe results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Hardware brightness scale used across the core (0..=50).
pub const BRIGHTNESS_MAX: u8 = 50;

/// RGB color value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
    };
    pub const RED: Self = Self { r: 255, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create from HSV (h: 0-360, s: 0-1, v: 0-1).
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(360.0);
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match (h / 60.0) as i32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        Self {
            r: ((r + m) * 255.0) as u8,
            g: ((g + m) * 255.0) as u8,
            b: ((b + m) * 255.0) as u8,
        }
    }

    /// Scale all channels by a factor in [0, 1].
    pub fn scale(self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        Self {
            r: (self.r as f32 * f) as u8,
            g: (self.g as f32 * f) as u8,
            b: (self.b as f32 * f) as u8,
        }
    }

    /// Linearly interpolate between two colors.
    pub fn lerp(a: Rgb, b: Rgb, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        Rgb {
            r: (a.r as f32 + (b.r as f32 - a.r as f32) * t) as u8,
            g: (a.g as f32 + (b.g as f32 - a.g as f32) * t) as u8,
            b: (a.b as f32 + (b.b as f32 - a.b as f32) * t) as u8,
        }
    }

    /// Parse "#RRGGBB" or a small set of color names.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() == 6 {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                return Some(Self::new(r, g, b));
            }
            return None;
        }
        match s.to_ascii_lowercase().as_str() {
            "red" => Some(Self::new(255, 0, 0)),
            "green" => Some(Self::new(0, 255, 0)),
            "blue" => Some(Self::new(0, 0, 255)),
            "yellow" => Some(Self::new(255, 255, 0)),
            "cyan" => Some(Self::new(0, 255, 255)),
            "magenta" | "pink" => Some(Self::new(255, 0, 255)),
            "white" => Some(Self::new(255, 255, 255)),
            "orange" => Some(Self::new(255, 165, 0)),
            "purple" => Some(Self::new(128, 0, 255)),
            _ => None,
        }
    }

    /// Format as "#RRGGBB".
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Relative luminance in [0, 1] (Rec. 601 weights).
    pub fn luminance(self) -> f32 {
        (0.299 * f32::from(self.r) + 0.587 * f32::from(self.g) + 0.114 * f32::from(self.b)) / 255.0
    }
}

/// A matrix position: (row, column).
pub type KeyPos = (u8, u8);

/// Per-key color map, keyed by matrix position.
pub type PerKeyMap = BTreeMap<KeyPos, Rgb>;

/// What a backend instance can do. Computed once at probe/open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Per-key addressing (row/column matrix writes).
    pub per_key: bool,
    /// Firmware-resident effects the controller free-runs.
    pub hardware_effects: bool,
    /// Programmable palette slots.
    pub palette: bool,
    /// Matrix dimensions (rows, cols) when per-key addressing exists.
    pub matrix: Option<(u8, u8)>,
}

impl Capabilities {
    /// Brightness-and-color only, no addressing.
    pub const fn uniform_only() -> Self {
        Self {
            per_key: false,
            hardware_effects: false,
            palette: false,
            matrix: None,
        }
    }
}

/// Result of probing a backend for availability on this system.
///
/// `available` is true only when the backend is plausibly usable.
/// `confidence` is a rough 0..=100 score used for auto-selection.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub available: bool,
    pub confidence: u8,
    pub reason: String,
    pub identifiers: BTreeMap<String, String>,
}

impl ProbeResult {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            confidence: 0,
            reason: reason.into(),
            identifiers: BTreeMap::new(),
        }
    }

    pub fn available(confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            available: true,
            confidence: confidence.min(100),
            reason: reason.into(),
            identifiers: BTreeMap::new(),
        }
    }

    pub fn with_identifier(mut self, key: &str, value: impl Into<String>) -> Self {
        self.identifiers.insert(key.to_string(), value.into());
        self
    }
}

/// Parameters for a hardware (firmware-resident) effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectParams {
    /// UI speed scale, 0..=10 (10 = fastest).
    pub speed: u8,
    /// Hardware brightness, 0..=50.
    pub brightness: u8,
    /// Color for effects that take one (e.g. breathing).
    pub color: Option<Rgb>,
}
