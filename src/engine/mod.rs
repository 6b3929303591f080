//! The effects engine.
//!
//! One render thread owns all hardware writes. Everything else (CLI, power
//! events, input events) mutates shared state under a mutex and the next
//! tick picks it up. Each tick plans frame writes from a single consistent
//! snapshot of the state, so a frame can never mix two intents or pair a
//! new color with a stale brightness.

pub mod reactive;
pub mod software;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use keyrgb_backend::{
    BackendError, Capabilities, DeviceHandle, EffectParams, PerKeyMap, Rgb, BRIGHTNESS_MAX,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ReactiveConfig;
use crate::diagnostics::Snapshot;
use crate::input::{InputAdapter, Stimulus};
use crate::intent::{frame_interval, speed_pace, BrightnessState, LightingIntent};
use crate::power::{PolicyAction, PowerEvent, PowerPolicy, PowerPolicyConfig};

use self::reactive::{pulse_life, ReactiveParams, ReactiveState};
use self::software::Frame;

/// Matrix assumed when the backend does not report one.
const DEFAULT_MATRIX: (u8, u8) = (6, 21);
/// Tick period while idle on a static intent (picks up fades, reconnects).
const IDLE_TICK: Duration = Duration::from_millis(100);
/// Tick period while a brightness fade is in flight.
const FADE_TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reactive: ReactiveConfig,
    pub power: PowerPolicyConfig,
    /// Duration of brightness fades (policy transitions, `--fade` sets).
    pub brightness_fade: Duration,
    /// Fade-in from black when a new intent is applied.
    pub intent_fade_in: Duration,
    /// Minimum spacing between reconnect probes after a device loss.
    pub reconnect_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reactive: ReactiveConfig::default(),
            power: PowerPolicyConfig::default(),
            brightness_fade: Duration::from_millis(400),
            intent_fade_in: Duration::from_millis(150),
            reconnect_interval: Duration::from_secs(2),
        }
    }
}

/// Produces a fresh device connection after a loss. Installed by the daemon;
/// tests install one returning mock handles.
pub type Reselector = Box<dyn Fn() -> Option<(Box<dyn DeviceHandle>, String)> + Send>;

/// Last write landed on the device, used to skip redundant writes for
/// non-animated intents.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stamp {
    generation: u64,
    brightness: u8,
    off: bool,
}

struct RenderState {
    intent: LightingIntent,
    brightness: BrightnessState,
    /// Bumped on every intent/override change; a frame belongs to exactly
    /// one generation.
    generation: u64,
    /// Animation time origin, reset when the intent changes.
    epoch: Instant,
    intent_fade_started: Option<Instant>,
    /// Policy-forced off (suspend, lid). Distinct from `intent == Off` so
    /// restore can bring the previous intent back.
    forced_off: bool,
    connected: bool,
    capabilities: Option<Capabilities>,
    stamp: Option<Stamp>,
    reactive: ReactiveState,
    degrade_warned: bool,
    last_error: Option<String>,
    last_reconnect: Option<Instant>,
}

struct DeviceSlot {
    handle: Option<Box<dyn DeviceHandle>>,
    backend: Option<String>,
}

/// One planned hardware write.
#[derive(Debug)]
enum WriteOp {
    Uniform(Rgb, u8),
    PerKey(PerKeyMap, u8),
    Brightness(u8),
    HwEffect(String, EffectParams),
    Off,
}

struct Core {
    state: Mutex<RenderState>,
    device: Mutex<DeviceSlot>,
    input: InputAdapter,
    policy: Mutex<PowerPolicy>,
    reselect: Mutex<Option<Reselector>>,
    running: AtomicBool,
    config: EngineConfig,
}

pub struct Engine {
    core: Arc<Core>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let now = Instant::now();
        let core = Core {
            state: Mutex::new(RenderState {
                intent: LightingIntent::Off,
                brightness: BrightnessState::new(BRIGHTNESS_MAX / 2),
                generation: 0,
                epoch: now,
                intent_fade_started: None,
                forced_off: false,
                connected: false,
                capabilities: None,
                stamp: None,
                reactive: ReactiveState::default(),
                degrade_warned: false,
                last_error: None,
                last_reconnect: None,
            }),
            device: Mutex::new(DeviceSlot {
                handle: None,
                backend: None,
            }),
            input: InputAdapter::new(),
            policy: Mutex::new(PowerPolicy::new(config.power.clone())),
            reselect: Mutex::new(None),
            running: AtomicBool::new(false),
            config,
        };
        Self {
            core: Arc::new(core),
            thread: Mutex::new(None),
        }
    }

    /// Install an open device handle. Replaces any previous one.
    pub fn attach(&self, handle: Box<dyn DeviceHandle>, backend: impl Into<String>) {
        self.core.attach(handle, backend.into());
    }

    pub fn set_reselector(&self, reselector: Reselector) {
        *self.core.reselect.lock() = Some(reselector);
    }

    /// Start the render thread. Idempotent.
    pub fn start(&self) {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return;
        }
        self.core.running.store(true, Ordering::SeqCst);
        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name("keyrgb-render".to_string())
            .spawn(move || {
                while core.running.load(Ordering::SeqCst) {
                    let sleep = core.tick(Instant::now());
                    std::thread::park_timeout(sleep);
                }
                debug!("render thread exiting");
            })
            .expect("spawning render thread");
        *slot = Some(handle);
    }

    /// Stop the render thread and wait for it.
    pub fn shutdown(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }

    pub fn apply_intent(&self, intent: LightingIntent) {
        self.core.apply_intent_at(intent, Instant::now());
        self.wake();
    }

    pub fn set_user_brightness(&self, level: u8, fade: bool) {
        self.core
            .set_user_brightness_at(level, fade, Instant::now());
        self.wake();
    }

    /// Apply the configured brightness at startup. Unlike
    /// [`Self::set_user_brightness`] this is not a manual adjustment, so it
    /// does not arm the policy's user-override window.
    pub fn set_startup_brightness(&self, level: u8) {
        self.core.set_brightness_level_at(level, false, Instant::now());
        self.wake();
    }

    pub fn on_power_event(&self, event: PowerEvent) {
        self.core.on_power_event_at(event, Instant::now());
        self.wake();
    }

    pub fn on_key_event(&self, key_id: &str, intensity: f32) {
        self.core.input.on_key_event(key_id, intensity, Instant::now());
    }

    pub fn set_keymap(&self, keymap: std::collections::HashMap<String, keyrgb_backend::KeyPos>) {
        self.core.input.set_keymap(keymap);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.core.snapshot(Instant::now())
    }

    /// Run exactly one render tick on the calling thread. For one-shot CLI
    /// commands that write a frame and exit without starting the thread.
    pub fn render_once(&self) {
        self.core.tick(Instant::now());
    }

    fn wake(&self) {
        if let Some(handle) = self.thread.lock().as_ref() {
            handle.thread().unpark();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Core {
    fn attach(&self, handle: Box<dyn DeviceHandle>, backend: String) {
        let capabilities = handle.capabilities();
        {
            let mut slot = self.device.lock();
            slot.handle = Some(handle);
            slot.backend = Some(backend.clone());
        }
        let mut st = self.state.lock();
        st.connected = true;
        st.capabilities = Some(capabilities);
        st.stamp = None;
        st.last_error = None;
        info!(backend, ?capabilities, "device attached");
    }

    fn apply_intent_at(&self, intent: LightingIntent, now: Instant) {
        let mut st = self.state.lock();
        info!(intent = %intent.describe(), "intent applied");
        st.intent = intent;
        st.generation += 1;
        st.epoch = now;
        st.intent_fade_started = Some(now);
        st.forced_off = false;
        st.reactive = ReactiveState::default();
        st.degrade_warned = false;
    }

    fn set_user_brightness_at(&self, level: u8, fade: bool, now: Instant) {
        self.set_brightness_level_at(level, fade, now);
        self.policy.lock().note_user_brightness(now);
    }

    fn set_brightness_level_at(&self, level: u8, fade: bool, now: Instant) {
        let level = level.min(BRIGHTNESS_MAX);
        let mut st = self.state.lock();
        let from = st.brightness.effective(now);
        st.brightness.user = level;
        if fade {
            st.brightness.begin_fade(from, now, self.config.brightness_fade);
        } else {
            st.brightness.cancel_fade();
        }
    }

    fn on_power_event_at(&self, event: PowerEvent, now: Instant) {
        let currently_off = {
            let st = self.state.lock();
            st.forced_off || st.intent == LightingIntent::Off
        };
        let actions = self.policy.lock().handle_event(event, now, currently_off);
        for action in actions {
            self.apply_policy_action(action, now);
        }
    }

    fn apply_policy_action(&self, action: PolicyAction, now: Instant) {
        let mut st = self.state.lock();
        debug!(?action, "applying policy action");
        match action {
            PolicyAction::SetOverride { level, fade } => {
                let from = st.brightness.effective(now);
                st.brightness.policy_override = level;
                if fade {
                    st.brightness.begin_fade(from, now, self.config.brightness_fade);
                } else {
                    st.brightness.cancel_fade();
                }
            }
            PolicyAction::TurnOff => {
                st.forced_off = true;
                st.generation += 1;
            }
            PolicyAction::Restore { fade } => {
                st.forced_off = false;
                st.generation += 1;
                st.epoch = now;
                if fade {
                    st.intent_fade_started = Some(now);
                }
            }
        }
    }

    fn snapshot(&self, now: Instant) -> Snapshot {
        let st = self.state.lock();
        let backend = self.device.lock().backend.clone();
        Snapshot {
            backend,
            connected: st.connected,
            capabilities: st.capabilities,
            intent: if st.forced_off {
                "off (policy)".to_string()
            } else {
                st.intent.describe()
            },
            brightness_user: st.brightness.user,
            brightness_effective: st.brightness.effective(now),
            policy_override: st.brightness.policy_override,
            on_battery: self.policy.lock().on_battery(),
            last_error: st.last_error.clone(),
        }
    }

    /// One render tick. Returns how long to sleep before the next one.
    fn tick(&self, now: Instant) -> Duration {
        self.maybe_reconnect(now);

        let (ops, stamp, next) = self.plan(now);
        if ops.is_empty() {
            return next;
        }

        let mut ok = true;
        for op in &ops {
            match self.execute(op) {
                Ok(()) => {}
                Err(err) => {
                    ok = false;
                    self.handle_write_error(op, err);
                    break;
                }
            }
        }

        if ok {
            if let Some(stamp) = stamp {
                self.state.lock().stamp = Some(stamp);
            }
        }
        next
    }

    /// Decide what to write, from one consistent state snapshot.
    fn plan(&self, now: Instant) -> (Vec<WriteOp>, Option<Stamp>, Duration) {
        let mut st = self.state.lock();
        if !st.connected {
            return (Vec::new(), None, self.config.reconnect_interval);
        }

        let eff = st.brightness.effective(now);
        let fading = st.brightness.fade_active(now);
        let fade_scale = self.intent_fade_scale(&st, now);
        let caps = st.capabilities.unwrap_or(Capabilities::uniform_only());
        let (rows, cols) = caps.matrix.unwrap_or(DEFAULT_MATRIX);
        let generation = st.generation;
        let stamp_current = st.stamp;

        let off_wanted = st.forced_off || st.intent == LightingIntent::Off;
        if off_wanted {
            let already = stamp_current.map(|s| s.off).unwrap_or(false);
            let ops = if already { Vec::new() } else { vec![WriteOp::Off] };
            let stamp = Stamp {
                generation,
                brightness: 0,
                off: true,
            };
            return (ops, Some(stamp), IDLE_TICK);
        }

        match st.intent.clone() {
            LightingIntent::StaticColor(rgb) => {
                let stale = stamp_current
                    .map(|s| s.generation != generation || s.brightness != eff || s.off)
                    .unwrap_or(true);
                if !stale && fade_scale >= 1.0 {
                    return (Vec::new(), None, if fading { FADE_TICK } else { IDLE_TICK });
                }
                let ops = vec![WriteOp::Uniform(rgb.scale(fade_scale), eff)];
                let next = if fading || fade_scale < 1.0 {
                    FADE_TICK
                } else {
                    IDLE_TICK
                };
                // A scaled (mid-fade) frame is not the final one; only a
                // full-scale write may be stamped as settled.
                let stamp = (fade_scale >= 1.0)
                    .then_some(Stamp { generation, brightness: eff, off: false });
                (ops, stamp, next)
            }
            LightingIntent::PerKey(map) => {
                let stale = stamp_current
                    .map(|s| s.generation != generation || s.brightness != eff || s.off)
                    .unwrap_or(true);
                if !stale && fade_scale >= 1.0 {
                    return (Vec::new(), None, if fading { FADE_TICK } else { IDLE_TICK });
                }
                let frame = Frame::PerKey(map);
                let ops = vec![self.frame_op(&mut st, frame, fade_scale, eff, caps)];
                let next = if fading || fade_scale < 1.0 {
                    FADE_TICK
                } else {
                    IDLE_TICK
                };
                let stamp = (fade_scale >= 1.0)
                    .then_some(Stamp { generation, brightness: eff, off: false });
                (ops, stamp, next)
            }
            LightingIntent::HardwareEffect { name, speed, color } => {
                let pushed = stamp_current
                    .map(|s| s.generation == generation && !s.off)
                    .unwrap_or(false);
                if !pushed {
                    let params = EffectParams {
                        speed,
                        brightness: eff,
                        color,
                    };
                    let ops = vec![WriteOp::HwEffect(name, params)];
                    return (
                        ops,
                        Some(Stamp { generation, brightness: eff, off: false }),
                        IDLE_TICK,
                    );
                }
                if stamp_current.map(|s| s.brightness != eff).unwrap_or(false) {
                    let ops = vec![WriteOp::Brightness(eff)];
                    return (
                        ops,
                        Some(Stamp { generation, brightness: eff, off: false }),
                        if fading { FADE_TICK } else { IDLE_TICK },
                    );
                }
                (Vec::new(), None, if fading { FADE_TICK } else { IDLE_TICK })
            }
            LightingIntent::SoftwareEffect { kind, speed, color } => {
                let next = frame_interval(kind, speed).min(if fading {
                    FADE_TICK
                } else {
                    Duration::from_secs(3600)
                });
                let (frame, brightness) = if kind.is_reactive() {
                    let boost = self.config.reactive.brightness_boost.min(BRIGHTNESS_MAX);
                    let stimuli = self.input.drain();
                    // A zero boost disables the reactive layer outright: no
                    // pulse may spawn, real or synthetic, so every frame
                    // stays at the backdrop baseline.
                    let spawn: &[Stimulus] = if boost > 0 { &stimuli } else { &[] };
                    let idle = self.input.idle_since(now);
                    let params = ReactiveParams {
                        kind,
                        color,
                        life: pulse_life(speed),
                        synthetic_after: if boost == 0
                            || self.config.reactive.synthetic_after.is_zero()
                        {
                            None
                        } else {
                            Some(self.config.reactive.synthetic_after)
                        },
                        rows,
                        cols,
                    };
                    let rendered = st.reactive.advance(now, spawn, idle, &params);
                    let pulse = (f32::from(boost) * rendered.peak).round() as u8;
                    (rendered.frame, eff.max(pulse))
                } else {
                    let t = now.saturating_duration_since(st.epoch).as_secs_f32()
                        * speed_pace(speed);
                    (software::render(kind, t, color, rows, cols), eff)
                };
                let op = self.frame_op(&mut st, frame, fade_scale, brightness, caps);
                (vec![op], None, next)
            }
            // Off handled above.
            LightingIntent::Off => (Vec::new(), None, IDLE_TICK),
        }
    }

    /// Turn a frame into a write op, degrading per-key frames to their
    /// average color on uniform-only hardware.
    fn frame_op(
        &self,
        st: &mut RenderState,
        frame: Frame,
        fade_scale: f32,
        brightness: u8,
        caps: Capabilities,
    ) -> WriteOp {
        match frame {
            Frame::Uniform(rgb) => WriteOp::Uniform(rgb.scale(fade_scale), brightness),
            Frame::PerKey(map) => {
                if caps.per_key {
                    let map = if fade_scale < 1.0 {
                        map.into_iter()
                            .map(|(pos, rgb)| (pos, rgb.scale(fade_scale)))
                            .collect()
                    } else {
                        map
                    };
                    WriteOp::PerKey(map, brightness)
                } else {
                    if !st.degrade_warned {
                        st.degrade_warned = true;
                        warn!("backend has no per-key support, using average color");
                    }
                    let rgb = Frame::PerKey(map).to_uniform();
                    WriteOp::Uniform(rgb.scale(fade_scale), brightness)
                }
            }
        }
    }

    fn intent_fade_scale(&self, st: &RenderState, now: Instant) -> f32 {
        let Some(started) = st.intent_fade_started else {
            return 1.0;
        };
        if self.config.intent_fade_in.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(started);
        if elapsed >= self.config.intent_fade_in {
            1.0
        } else {
            elapsed.as_secs_f32() / self.config.intent_fade_in.as_secs_f32()
        }
    }

    /// Execute one write, retrying once on transient errors.
    fn execute(&self, op: &WriteOp) -> Result<(), BackendError> {
        let mut slot = self.device.lock();
        let Some(handle) = slot.handle.as_mut() else {
            return Err(BackendError::Unavailable);
        };
        let mut result = Self::dispatch(handle.as_mut(), op);
        if matches!(&result, Err(err) if err.is_retryable()) {
            debug!(?op, "transient write failure, retrying");
            std::thread::sleep(Duration::from_millis(5));
            result = Self::dispatch(handle.as_mut(), op);
        }
        if matches!(&result, Err(err) if err.is_terminal()) {
            // The handle must never be reused after a terminal failure.
            slot.handle = None;
        }
        result
    }

    fn dispatch(handle: &mut dyn DeviceHandle, op: &WriteOp) -> Result<(), BackendError> {
        match op {
            WriteOp::Uniform(rgb, brightness) => handle.set_uniform_color(*rgb, *brightness),
            WriteOp::PerKey(map, brightness) => handle.set_key_colors(map, *brightness),
            WriteOp::Brightness(level) => handle.set_brightness(*level),
            WriteOp::HwEffect(name, params) => handle.set_hardware_effect(name, params),
            WriteOp::Off => handle.turn_off(),
        }
    }

    fn handle_write_error(&self, op: &WriteOp, err: BackendError) {
        let mut st = self.state.lock();
        match &err {
            BackendError::DeviceGone | BackendError::Unavailable => {
                warn!(%err, "device lost, will re-probe");
                st.connected = false;
                st.stamp = None;
                st.last_error = Some(err.to_string());
            }
            BackendError::Unsupported(what) => {
                if !st.degrade_warned {
                    st.degrade_warned = true;
                    warn!(what, "operation not supported by backend, skipping");
                }
            }
            _ => {
                warn!(?op, %err, "hardware write failed");
                st.last_error = Some(err.to_string());
            }
        }
    }

    fn maybe_reconnect(&self, now: Instant) {
        {
            let mut st = self.state.lock();
            if st.connected {
                return;
            }
            if let Some(last) = st.last_reconnect {
                if now.saturating_duration_since(last) < self.config.reconnect_interval {
                    return;
                }
            }
            st.last_reconnect = Some(now);
        }
        let reselect = self.reselect.lock();
        let Some(factory) = reselect.as_ref() else {
            return;
        };
        if let Some((handle, backend)) = factory() {
            info!(backend, "device reconnected");
            drop(reselect);
            self.attach(handle, backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrgb_backend::mock::{MockBackend, RecordedWrite, Recorder};
    use keyrgb_backend::Backend;

    use crate::intent::SoftwareEffectKind;

    fn test_config() -> EngineConfig {
        EngineConfig {
            intent_fade_in: Duration::ZERO,
            reconnect_interval: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    fn engine_with_mock(backend: MockBackend) -> (Engine, Recorder) {
        let recorder = backend.recorder();
        let handle = backend.open().unwrap();
        let engine = Engine::new(test_config());
        engine.attach(handle, backend.name());
        (engine, recorder)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_static_color_written_once_with_brightness() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_user_brightness_at(30, false, t0);

        engine.core.tick(t0 + secs(1));
        engine.core.tick(t0 + secs(2));

        // One combined write, then nothing (state unchanged).
        assert_eq!(
            recorder.writes(),
            vec![RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 30
            }]
        );
    }

    #[test]
    fn test_color_and_brightness_never_split() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_user_brightness_at(30, false, t0);
        engine.core.tick(t0 + secs(1));

        // Change both; the next frame must carry both new values together.
        engine
            .core
            .apply_intent_at(LightingIntent::StaticColor(Rgb::new(0, 0, 255)), t0 + secs(2));
        engine.core.set_user_brightness_at(10, false, t0 + secs(2));
        engine.core.tick(t0 + secs(3));

        let valid = [
            RecordedWrite::Uniform { rgb: Rgb::RED, brightness: 30 },
            RecordedWrite::Uniform { rgb: Rgb::new(0, 0, 255), brightness: 10 },
        ];
        for write in recorder.writes() {
            assert!(valid.contains(&write), "mixed-state write: {write:?}");
        }
    }

    #[test]
    fn test_off_pushed_once() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::Off, t0);
        engine.core.tick(t0 + secs(1));
        engine.core.tick(t0 + secs(2));
        assert_eq!(recorder.writes(), vec![RecordedWrite::Off]);
    }

    #[test]
    fn test_hardware_effect_pushed_once_brightness_separate() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(
            LightingIntent::HardwareEffect {
                name: "rainbow".to_string(),
                speed: 5,
                color: None,
            },
            t0,
        );
        engine.core.set_user_brightness_at(30, false, t0);
        engine.core.tick(t0 + secs(1));
        engine.core.tick(t0 + secs(2));
        engine.core.set_user_brightness_at(10, false, t0 + secs(3));
        engine.core.tick(t0 + secs(4));

        assert_eq!(
            recorder.writes(),
            vec![
                RecordedWrite::HardwareEffect {
                    name: "rainbow".to_string(),
                    params: EffectParams {
                        speed: 5,
                        brightness: 30,
                        color: None
                    }
                },
                RecordedWrite::Brightness(10),
            ]
        );
    }

    #[test]
    fn test_software_effect_writes_every_tick() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(
            LightingIntent::SoftwareEffect {
                kind: SoftwareEffectKind::SpectrumCycle,
                speed: 5,
                color: Rgb::WHITE,
            },
            t0,
        );
        engine.core.set_user_brightness_at(25, false, t0);
        for i in 1..=3 {
            engine.core.tick(t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(recorder.write_count(), 3);
        for write in recorder.writes() {
            assert!(matches!(
                write,
                RecordedWrite::Uniform { brightness: 25, .. }
            ));
        }
    }

    #[test]
    fn test_per_key_degrades_to_average_on_uniform_hardware() {
        let (engine, recorder) = engine_with_mock(MockBackend::uniform_only());
        let t0 = Instant::now();
        let mut map = PerKeyMap::new();
        map.insert((0, 0), Rgb::new(200, 0, 0));
        map.insert((0, 1), Rgb::new(0, 0, 0));
        engine.core.apply_intent_at(LightingIntent::PerKey(map), t0);
        engine.core.set_user_brightness_at(20, false, t0);
        engine.core.tick(t0 + secs(1));

        assert_eq!(
            recorder.writes(),
            vec![RecordedWrite::Uniform {
                rgb: Rgb::new(100, 0, 0),
                brightness: 20
            }]
        );
    }

    #[test]
    fn test_per_key_frame_round_trips_on_capable_hardware() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        let mut map = PerKeyMap::new();
        map.insert((0, 0), Rgb::new(200, 10, 0));
        map.insert((2, 5), Rgb::new(0, 128, 64));
        map.insert((5, 20), Rgb::WHITE);
        engine.core.apply_intent_at(LightingIntent::PerKey(map.clone()), t0);
        engine.core.set_user_brightness_at(35, false, t0);
        engine.core.tick(t0 + secs(1));

        // Every key reaches the device exactly as laid out.
        assert_eq!(
            recorder.writes(),
            vec![RecordedWrite::PerKey {
                map,
                brightness: 35
            }]
        );
    }

    #[test]
    fn test_battery_dim_fades_instead_of_jumping() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_user_brightness_at(40, false, t0);
        engine.core.tick(t0 + secs(1));

        engine.core.on_power_event_at(PowerEvent::AcUnplugged, t0 + secs(10));
        // Halfway through the 400 ms fade the level is between the user
        // setting and the battery cap, not already at the cap.
        engine.core.tick(t0 + secs(10) + Duration::from_millis(200));
        match recorder.writes().last() {
            Some(RecordedWrite::Uniform { brightness, .. }) => {
                assert!(
                    (16..40).contains(brightness),
                    "expected an intermediate level, got {brightness}"
                );
            }
            other => panic!("expected uniform write, got {other:?}"),
        }

        engine.core.tick(t0 + secs(12));
        assert_eq!(
            recorder.writes().last(),
            Some(&RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 15
            })
        );
    }

    #[test]
    fn test_startup_brightness_does_not_block_battery_cap() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_brightness_level_at(40, false, t0);
        engine.core.tick(t0 + secs(1));

        // Unplug right after start, well inside the user-override window:
        // startup config application is not a manual adjustment, so the
        // battery cap still applies.
        engine.core.on_power_event_at(PowerEvent::AcUnplugged, t0 + secs(2));
        engine.core.tick(t0 + secs(4));
        assert_eq!(
            recorder.writes().last(),
            Some(&RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 15
            })
        );
    }

    #[test]
    fn test_transient_error_retried_once() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        recorder.fail_next(BackendError::Busy("contended".into()));
        engine.core.tick(t0 + secs(1));

        // The retry landed the write and the engine stays connected.
        assert_eq!(recorder.write_count(), 1);
        assert!(engine.snapshot().connected);
    }

    #[test]
    fn test_device_gone_disconnects_and_reconnects() {
        let backend = MockBackend::per_key();
        let recorder = backend.recorder();
        let (engine, _) = {
            let handle = backend.open().unwrap();
            let engine = Engine::new(test_config());
            engine.attach(handle, "mock");
            (engine, ())
        };
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);

        recorder.fail_next(BackendError::DeviceGone);
        recorder.fail_next(BackendError::DeviceGone); // retry also fails
        engine.core.tick(t0 + secs(1));
        assert!(!engine.snapshot().connected);

        // Nothing is written while disconnected and no reselector is set.
        engine.core.tick(t0 + secs(2));
        assert_eq!(recorder.write_count(), 0);

        // With a reselector installed the engine reconnects and re-pushes.
        let replacement = MockBackend::per_key();
        let replacement_recorder = replacement.recorder();
        let handle = Mutex::new(Some(replacement.open().unwrap()));
        engine.set_reselector(Box::new(move || {
            handle.lock().take().map(|h| (h, "mock".to_string()))
        }));
        engine.core.tick(t0 + secs(3));
        engine.core.tick(t0 + secs(4));
        assert!(engine.snapshot().connected);
        assert_eq!(
            replacement_recorder.writes(),
            vec![RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 25
            }]
        );
    }

    #[test]
    fn test_device_gone_is_not_retried() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        recorder.fail_next(BackendError::DeviceGone);
        engine.core.tick(t0 + secs(1));
        // Terminal: no second attempt hit the device.
        assert_eq!(recorder.write_count(), 0);
        assert!(!engine.snapshot().connected);
    }

    #[test]
    fn test_battery_event_dims_through_engine() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_user_brightness_at(40, false, t0);
        engine.core.tick(t0 + secs(1));

        // Outside the user-override window, so the battery cap applies.
        engine.core.on_power_event_at(PowerEvent::AcUnplugged, t0 + secs(10));
        // After the fade window the effective level is the battery cap.
        engine.core.tick(t0 + secs(12));
        let writes = recorder.writes();
        assert_eq!(
            writes.last(),
            Some(&RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 15
            })
        );
        assert!(engine.snapshot().on_battery);
    }

    #[test]
    fn test_suspend_forces_off_and_resume_restores() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        engine.core.set_user_brightness_at(30, false, t0);
        engine.core.tick(t0 + secs(1));

        engine.core.on_power_event_at(PowerEvent::SuspendPrepare, t0 + secs(2));
        engine.core.tick(t0 + secs(3));
        assert_eq!(recorder.writes().last(), Some(&RecordedWrite::Off));

        engine.core.on_power_event_at(PowerEvent::Resumed, t0 + secs(60));
        engine.core.tick(t0 + secs(62));
        assert_eq!(
            recorder.writes().last(),
            Some(&RecordedWrite::Uniform {
                rgb: Rgb::RED,
                brightness: 30
            })
        );
    }

    #[test]
    fn test_reactive_pulse_boosts_above_dimmed_baseline() {
        let (engine, recorder) = engine_with_mock(MockBackend::per_key());
        let t0 = Instant::now();
        engine.core.input.set_keymap(std::collections::HashMap::from([(
            "a".to_string(),
            (2u8, 1u8),
        )]));
        engine.core.apply_intent_at(
            LightingIntent::SoftwareEffect {
                kind: SoftwareEffectKind::ReactiveFade,
                speed: 5,
                color: Rgb::WHITE,
            },
            t0,
        );
        engine.core.set_user_brightness_at(5, false, t0);

        engine.core.input.on_key_event("a", 1.0, t0 + secs(1));
        engine.core.tick(t0 + secs(1));

        match recorder.writes().last() {
            Some(RecordedWrite::PerKey { brightness, .. }) => {
                assert_eq!(*brightness, 40, "pulse should reach the boost level");
            }
            other => panic!("expected per-key write, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_boost_keeps_baseline() {
        let mut config = test_config();
        config.reactive.brightness_boost = 0;
        config.reactive.synthetic_after = Duration::ZERO;
        let backend = MockBackend::per_key();
        let recorder = backend.recorder();
        let engine = Engine::new(config);
        engine.attach(backend.open().unwrap(), "mock");

        let t0 = Instant::now();
        engine.core.input.set_keymap(std::collections::HashMap::from([(
            "a".to_string(),
            (2u8, 1u8),
        )]));
        engine.core.apply_intent_at(
            LightingIntent::SoftwareEffect {
                kind: SoftwareEffectKind::ReactiveFade,
                speed: 5,
                color: Rgb::WHITE,
            },
            t0,
        );
        engine.core.set_user_brightness_at(5, false, t0);
        engine.core.input.on_key_event("a", 1.0, t0 + secs(1));
        engine.core.tick(t0 + secs(1));

        // Neither the brightness nor the frame may react: the pressed key
        // stays at the faint backdrop tint like every other key.
        match recorder.writes().last() {
            Some(RecordedWrite::PerKey { map, brightness }) => {
                assert_eq!(*brightness, 5);
                let backdrop = Rgb::WHITE.scale(0.04);
                assert_eq!(
                    map.get(&(2, 1)),
                    Some(&backdrop),
                    "pulse visible despite zero reactive brightness"
                );
                assert!(map.values().all(|rgb| *rgb == backdrop));
            }
            other => panic!("expected per-key write, got {other:?}"),
        }
    }

    #[test]
    fn test_no_writes_without_device() {
        let engine = Engine::new(test_config());
        let t0 = Instant::now();
        engine.core.apply_intent_at(LightingIntent::StaticColor(Rgb::RED), t0);
        // No device attached: plan yields nothing and nothing panics.
        engine.core.tick(t0 + secs(1));
        assert!(!engine.snapshot().connected);
    }
}
