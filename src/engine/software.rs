//! Host-rendered effect frames.
//!
//! Every function here is pure: a frame is a function of the paced animation
//! clock `t` (seconds, already multiplied by the speed pace) and the effect
//! color. The render thread owns the clock; tests drive `t` directly.

use keyrgb_backend::{PerKeyMap, Rgb};

use crate::intent::SoftwareEffectKind;

/// One rendered frame, before brightness is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Uniform(Rgb),
    PerKey(PerKeyMap),
}

impl Frame {
    /// Collapse to a single color for uniform-only hardware.
    pub fn to_uniform(&self) -> Rgb {
        match self {
            Frame::Uniform(rgb) => *rgb,
            Frame::PerKey(map) => average(map),
        }
    }
}

fn average(map: &PerKeyMap) -> Rgb {
    if map.is_empty() {
        return Rgb::BLACK;
    }
    let (mut r, mut g, mut b) = (0u32, 0u32, 0u32);
    for rgb in map.values() {
        r += u32::from(rgb.r);
        g += u32::from(rgb.g);
        b += u32::from(rgb.b);
    }
    let n = map.len() as u32;
    Rgb {
        r: (r / n) as u8,
        g: (g / n) as u8,
        b: (b / n) as u8,
    }
}

/// Render one frame of a non-reactive software effect.
pub fn render(kind: SoftwareEffectKind, t: f32, color: Rgb, rows: u8, cols: u8) -> Frame {
    match kind {
        SoftwareEffectKind::SpectrumCycle => Frame::Uniform(spectrum_cycle(t)),
        SoftwareEffectKind::ColorCycle => Frame::Uniform(color_cycle(t)),
        SoftwareEffectKind::Strobe => Frame::Uniform(strobe(t, color)),
        SoftwareEffectKind::RainbowWave => Frame::PerKey(rainbow_wave(t, rows, cols)),
        SoftwareEffectKind::RainbowSwirl => Frame::PerKey(rainbow_swirl(t, rows, cols)),
        SoftwareEffectKind::Chase => Frame::PerKey(chase(t, color, rows, cols)),
        SoftwareEffectKind::Twinkle => Frame::PerKey(twinkle(t, color, rows, cols)),
        SoftwareEffectKind::ReactiveFade | SoftwareEffectKind::ReactiveRipple => {
            // Reactive frames are stateful and rendered in the reactive module;
            // with no stimuli the backdrop is dark.
            Frame::Uniform(Rgb::BLACK)
        }
    }
}

/// Whole keyboard sweeps the hue wheel, one revolution every ~9 s at pace 1.
fn spectrum_cycle(t: f32) -> Rgb {
    Rgb::from_hsv((t * 40.0).rem_euclid(360.0), 1.0, 1.0)
}

/// Steps through six primary hues, holding then blending into the next.
fn color_cycle(t: f32) -> Rgb {
    const HOLD: f32 = 1.5;
    let slot = t / HOLD;
    let idx = slot.floor();
    let frac = slot - idx;
    // Hold for the first 70% of the slot, blend over the rest.
    let blend = ((frac - 0.7) / 0.3).clamp(0.0, 1.0);
    let hue = (idx + blend) * 60.0;
    Rgb::from_hsv(hue.rem_euclid(360.0), 1.0, 1.0)
}

fn strobe(t: f32, color: Rgb) -> Rgb {
    if (t * 2.0).fract() < 0.5 {
        color
    } else {
        Rgb::BLACK
    }
}

/// Horizontal rainbow scrolling left, with a slight per-row hue slant.
fn rainbow_wave(t: f32, rows: u8, cols: u8) -> PerKeyMap {
    let mut map = PerKeyMap::new();
    let cols_f = f32::from(cols.max(2) - 1);
    for r in 0..rows {
        for c in 0..cols {
            let hue =
                (t * 40.0 + f32::from(c) / cols_f * 360.0 + f32::from(r) * 15.0).rem_euclid(360.0);
            map.insert((r, c), Rgb::from_hsv(hue, 1.0, 1.0));
        }
    }
    map
}

/// Rainbow rotating around the matrix center.
fn rainbow_swirl(t: f32, rows: u8, cols: u8) -> PerKeyMap {
    let mut map = PerKeyMap::new();
    let cy = f32::from(rows.saturating_sub(1)) / 2.0;
    let cx = f32::from(cols.saturating_sub(1)) / 2.0;
    for r in 0..rows {
        for c in 0..cols {
            // Rows are squashed so the swirl looks round on a wide matrix.
            let dy = (f32::from(r) - cy) * 2.0;
            let dx = f32::from(c) - cx;
            let angle = dy.atan2(dx).to_degrees();
            let radius = (dx * dx + dy * dy).sqrt();
            let hue = (angle + radius * 12.0 + t * 90.0).rem_euclid(360.0);
            map.insert((r, c), Rgb::from_hsv(hue, 1.0, 1.0));
        }
    }
    map
}

/// A bright band sweeping across the columns over a dim backdrop.
fn chase(t: f32, color: Rgb, rows: u8, cols: u8) -> PerKeyMap {
    const BAND: f32 = 3.0;
    let cols_f = f32::from(cols.max(1));
    let pos = (t * 6.0).rem_euclid(cols_f);
    let mut map = PerKeyMap::new();
    for r in 0..rows {
        for c in 0..cols {
            let d = (f32::from(c) - pos).abs();
            let d = d.min(cols_f - d); // wrap-around distance
            let intensity = (1.0 - d / BAND).max(0.0);
            let lit = color.scale(0.05 + 0.95 * intensity);
            map.insert((r, c), lit);
        }
    }
    map
}

/// Random keys sparkle up and back down; deterministic per (key, cycle).
fn twinkle(t: f32, color: Rgb, rows: u8, cols: u8) -> PerKeyMap {
    const CYCLE: f32 = 1.2;
    const DENSITY: u32 = 18; // percent of keys lit per cycle
    let mut map = PerKeyMap::new();
    for r in 0..rows {
        for c in 0..cols {
            let phase = f32::from(hash3(r.into(), c.into(), 0) as u16 % 1000) / 1000.0;
            let local = t / CYCLE + phase;
            let cycle = local.floor() as u32;
            let frac = local - local.floor();
            let lit = hash3(r.into(), c.into(), cycle.wrapping_add(1)) % 100 < DENSITY;
            let intensity = if lit {
                // Triangle ramp: up then down within the cycle.
                1.0 - (frac * 2.0 - 1.0).abs()
            } else {
                0.0
            };
            map.insert((r, c), color.scale(0.04 + 0.96 * intensity));
        }
    }
    map
}

/// Small integer mix, stable across platforms (no RNG dependency needed for
/// a visual sparkle pattern).
fn hash3(a: u32, b: u32, c: u32) -> u32 {
    let mut h = a.wrapping_mul(0x9e37_79b9) ^ b.wrapping_mul(0x85eb_ca6b) ^ c.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2c1b_3c6d);
    h ^= h >> 12;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        for kind in [
            SoftwareEffectKind::SpectrumCycle,
            SoftwareEffectKind::RainbowWave,
            SoftwareEffectKind::Twinkle,
            SoftwareEffectKind::Chase,
        ] {
            let a = render(kind, 3.25, Rgb::RED, 6, 21);
            let b = render(kind, 3.25, Rgb::RED, 6, 21);
            assert_eq!(a, b, "{}", kind.name());
        }
    }

    #[test]
    fn test_per_key_frames_cover_matrix() {
        match render(SoftwareEffectKind::RainbowWave, 0.0, Rgb::WHITE, 6, 21) {
            Frame::PerKey(map) => assert_eq!(map.len(), 6 * 21),
            Frame::Uniform(_) => panic!("expected per-key frame"),
        }
    }

    #[test]
    fn test_strobe_alternates() {
        let on = render(SoftwareEffectKind::Strobe, 0.1, Rgb::RED, 6, 21);
        let off = render(SoftwareEffectKind::Strobe, 0.35, Rgb::RED, 6, 21);
        assert_eq!(on, Frame::Uniform(Rgb::RED));
        assert_eq!(off, Frame::Uniform(Rgb::BLACK));
    }

    #[test]
    fn test_wave_moves_over_time() {
        let a = render(SoftwareEffectKind::RainbowWave, 0.0, Rgb::WHITE, 6, 21);
        let b = render(SoftwareEffectKind::RainbowWave, 1.0, Rgb::WHITE, 6, 21);
        assert_ne!(a, b);
    }

    #[test]
    fn test_uniform_collapse_averages() {
        let mut map = PerKeyMap::new();
        map.insert((0, 0), Rgb { r: 200, g: 0, b: 0 });
        map.insert((0, 1), Rgb { r: 0, g: 0, b: 0 });
        let avg = Frame::PerKey(map).to_uniform();
        assert_eq!(avg, Rgb { r: 100, g: 0, b: 0 });
    }
}
