//! Reactive (key-press driven) effect rendering.
//!
//! Unlike the free-running effects in [`super::software`], reactive frames
//! carry state: each stimulus spawns a pulse that decays across ticks. The
//! render thread owns one [`ReactiveState`] per intent generation and feeds
//! it drained stimuli every tick.

use std::time::{Duration, Instant};

use keyrgb_backend::{PerKeyMap, Rgb};

use crate::engine::software::Frame;
use crate::input::Stimulus;
use crate::intent::SoftwareEffectKind;

/// How far a ripple front travels per second, in key cells.
const RIPPLE_CELLS_PER_SEC: f32 = 9.0;
/// Ripple ring half-thickness in cells.
const RIPPLE_THICKNESS: f32 = 1.6;

#[derive(Debug, Clone, Copy)]
struct Pulse {
    pos: Option<(u8, u8)>,
    intensity: f32,
    born: Instant,
}

/// Live pulse set for one reactive intent.
#[derive(Default)]
pub struct ReactiveState {
    pulses: Vec<Pulse>,
    last_synthetic: Option<Instant>,
    synthetic_seq: u32,
}

pub struct ReactiveParams {
    pub kind: SoftwareEffectKind,
    pub color: Rgb,
    /// Pulse lifetime, derived from the UI speed.
    pub life: Duration,
    /// Inject a fake pulse when no real input arrives for this long.
    pub synthetic_after: Option<Duration>,
    pub rows: u8,
    pub cols: u8,
}

/// Pulse lifetime for a 0..=10 UI speed: ~1.45 s at speed 0 down to 0.25 s
/// at speed 10.
pub fn pulse_life(speed: u8) -> Duration {
    Duration::from_millis(250 + u64::from(10 - speed.min(10)) * 120)
}

/// The rendered frame plus the strongest live pulse intensity (0..=1), which
/// the engine uses for the transient brightness boost.
pub struct ReactiveFrame {
    pub frame: Frame,
    pub peak: f32,
}

impl ReactiveState {
    /// Absorb stimuli and render the frame for `now`.
    pub fn advance(
        &mut self,
        now: Instant,
        stimuli: &[Stimulus],
        idle: Option<Duration>,
        params: &ReactiveParams,
    ) -> ReactiveFrame {
        for s in stimuli {
            if s.intensity <= 0.0 {
                continue;
            }
            self.pulses.push(Pulse {
                pos: s.pos,
                intensity: s.intensity,
                born: s.at.min(now),
            });
            self.last_synthetic = None;
        }

        if let Some(after) = params.synthetic_after {
            self.maybe_synthesize(now, idle, after, params);
        }

        self.pulses
            .retain(|p| now.saturating_duration_since(p.born) < params.life);
        // Bursty typing should not grow the set without bound.
        if self.pulses.len() > 64 {
            let excess = self.pulses.len() - 64;
            self.pulses.drain(..excess);
        }

        match params.kind {
            SoftwareEffectKind::ReactiveRipple => self.render_ripple(now, params),
            _ => self.render_fade(now, params),
        }
    }

    /// With no real input, keep the effect alive with an occasional pulse at
    /// a pseudo-random key.
    fn maybe_synthesize(
        &mut self,
        now: Instant,
        idle: Option<Duration>,
        after: Duration,
        params: &ReactiveParams,
    ) {
        let idle_enough = idle.map(|d| d >= after).unwrap_or(true);
        let spaced = self
            .last_synthetic
            .map(|at| now.saturating_duration_since(at) >= after)
            .unwrap_or(true);
        if !idle_enough || !spaced {
            return;
        }
        self.synthetic_seq = self.synthetic_seq.wrapping_add(1);
        let h = self
            .synthetic_seq
            .wrapping_mul(0x9e37_79b9)
            .rotate_left(13)
            .wrapping_mul(0x85eb_ca6b);
        let r = (h % u32::from(params.rows.max(1))) as u8;
        let c = ((h >> 8) % u32::from(params.cols.max(1))) as u8;
        self.pulses.push(Pulse {
            pos: Some((r, c)),
            intensity: 0.8,
            born: now,
        });
        self.last_synthetic = Some(now);
    }

    fn decay(&self, pulse: &Pulse, now: Instant, life: Duration) -> f32 {
        let age = now.saturating_duration_since(pulse.born).as_secs_f32();
        (1.0 - age / life.as_secs_f32()).clamp(0.0, 1.0) * pulse.intensity
    }

    /// Pressed key lights up and fades in place. Global (unmapped) pulses
    /// flash the whole board.
    fn render_fade(&self, now: Instant, params: &ReactiveParams) -> ReactiveFrame {
        let mut map = PerKeyMap::new();
        let mut global = 0.0f32;
        let mut peak = 0.0f32;
        for p in &self.pulses {
            let level = self.decay(p, now, params.life);
            peak = peak.max(level);
            match p.pos {
                Some(pos) => {
                    let prev = map.get(&pos).copied().unwrap_or(Rgb::BLACK);
                    let lit = params.color.scale(level);
                    if lit.luminance() > prev.luminance() {
                        map.insert(pos, lit);
                    }
                }
                None => global = global.max(level),
            }
        }

        if global > 0.0 {
            return ReactiveFrame {
                frame: Frame::Uniform(params.color.scale(global)),
                peak,
            };
        }
        ReactiveFrame {
            frame: Frame::PerKey(fill_backdrop(map, params)),
            peak,
        }
    }

    /// A ring expands outward from each press at constant speed, fading as
    /// the pulse ages. Distance is Manhattan with rows weighted double so
    /// rings look round on a wide matrix.
    fn render_ripple(&self, now: Instant, params: &ReactiveParams) -> ReactiveFrame {
        let mut map = PerKeyMap::new();
        let mut peak = 0.0f32;
        for r in 0..params.rows {
            for c in 0..params.cols {
                let mut level = 0.0f32;
                for p in &self.pulses {
                    let strength = self.decay(p, now, params.life);
                    if strength <= 0.0 {
                        continue;
                    }
                    let age = now.saturating_duration_since(p.born).as_secs_f32();
                    let radius = age * RIPPLE_CELLS_PER_SEC;
                    let dist = match p.pos {
                        Some((pr, pc)) => {
                            let dr = f32::from(pr.abs_diff(r)) * 2.0;
                            let dc = f32::from(pc.abs_diff(c));
                            dr + dc
                        }
                        // Unmapped press ripples from the matrix center.
                        None => {
                            let dr = (f32::from(r) - f32::from(params.rows - 1) / 2.0).abs() * 2.0;
                            let dc = (f32::from(c) - f32::from(params.cols - 1) / 2.0).abs();
                            dr + dc
                        }
                    };
                    let ring = (1.0 - (dist - radius).abs() / RIPPLE_THICKNESS).max(0.0);
                    level = level.max(ring * strength);
                }
                peak = peak.max(level);
                if level > 0.0 {
                    map.insert((r, c), params.color.scale(level));
                }
            }
        }
        ReactiveFrame {
            frame: Frame::PerKey(fill_backdrop(map, params)),
            peak,
        }
    }
}

/// Unlit keys get a faint tint of the effect color so the board does not
/// read as dead between presses.
fn fill_backdrop(mut map: PerKeyMap, params: &ReactiveParams) -> PerKeyMap {
    let backdrop = params.color.scale(0.04);
    for r in 0..params.rows {
        for c in 0..params.cols {
            map.entry((r, c)).or_insert(backdrop);
        }
    }
    map
}
