//! Recording mock backend for tests.
//!
//! Records every hardware write and can inject scripted failures, which is
//! how the engine invariants (combined writes, disconnect terminality,
//! single-intent frames) are asserted without hardware.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    Backend, BackendError, Capabilities, DeviceHandle, EffectParams, PerKeyMap, ProbeResult, Rgb,
};

/// One recorded hardware write.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedWrite {
    Uniform { rgb: Rgb, brightness: u8 },
    PerKey { map: PerKeyMap, brightness: u8 },
    Brightness(u8),
    HardwareEffect { name: String, params: EffectParams },
    Off,
}

/// Shared recorder; clone it before handing the backend to the engine.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<RecorderInner>>,
}

#[derive(Default)]
struct RecorderInner {
    writes: Vec<RecordedWrite>,
    failures: VecDeque<BackendError>,
}

impl Recorder {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    pub fn clear(&self) {
        self.inner.lock().writes.clear();
    }

    /// Queue an error to be returned by the next write attempt.
    pub fn fail_next(&self, err: BackendError) {
        self.inner.lock().failures.push_back(err);
    }

    fn record(&self, write: RecordedWrite) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.writes.push(write);
        Ok(())
    }
}

/// Configurable fake backend.
pub struct MockBackend {
    name: &'static str,
    priority: i32,
    available: bool,
    confidence: u8,
    capabilities: Capabilities,
    recorder: Recorder,
}

impl MockBackend {
    /// A per-key capable mock with a 6x21 matrix, available at confidence 90.
    pub fn per_key() -> Self {
        Self::named("mock", 50).with_capabilities(Capabilities {
            per_key: true,
            hardware_effects: true,
            palette: true,
            matrix: Some((6, 21)),
        })
    }

    /// A uniform-only mock (no per-key, no hardware effects).
    pub fn uniform_only() -> Self {
        Self::named("mock-uniform", 50)
    }

    pub fn named(name: &'static str, priority: i32) -> Self {
        Self {
            name,
            priority,
            available: true,
            confidence: 90,
            capabilities: Capabilities::uniform_only(),
            recorder: Recorder::default(),
        }
    }

    pub fn with_probe(mut self, available: bool, confidence: u8) -> Self {
        self.available = available;
        self.confidence = confidence;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The shared recorder backing every handle this backend opens.
    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn probe(&self) -> ProbeResult {
        if self.available {
            ProbeResult::available(self.confidence, "mock")
        } else {
            ProbeResult::unavailable("mock")
        }
    }

    fn open(&self) -> Result<Box<dyn DeviceHandle>, BackendError> {
        if !self.available {
            return Err(BackendError::Unavailable);
        }
        Ok(Box::new(MockHandle {
            capabilities: self.capabilities,
            recorder: self.recorder.clone(),
            off: false,
        }))
    }
}

pub struct MockHandle {
    capabilities: Capabilities,
    recorder: Recorder,
    off: bool,
}

impl DeviceHandle for MockHandle {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn set_uniform_color(&mut self, rgb: Rgb, brightness: u8) -> Result<(), BackendError> {
        self.recorder.record(RecordedWrite::Uniform { rgb, brightness })?;
        self.off = false;
        Ok(())
    }

    fn set_key_colors(&mut self, map: &PerKeyMap, brightness: u8) -> Result<(), BackendError> {
        if !self.capabilities.per_key {
            return Err(BackendError::Unsupported("per-key"));
        }
        self.recorder.record(RecordedWrite::PerKey {
            map: map.clone(),
            brightness,
        })?;
        self.off = false;
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), BackendError> {
        self.recorder.record(RecordedWrite::Brightness(level))?;
        self.off = level == 0;
        Ok(())
    }

    fn set_hardware_effect(
        &mut self,
        name: &str,
        params: &EffectParams,
    ) -> Result<(), BackendError> {
        if !self.capabilities.hardware_effects {
            return Err(BackendError::Unsupported("hardware effects"));
        }
        self.recorder.record(RecordedWrite::HardwareEffect {
            name: name.to_string(),
            params: params.clone(),
        })?;
        self.off = false;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), BackendError> {
        self.recorder.record(RecordedWrite::Off)?;
        self.off = true;
        Ok(())
    }

    fn is_off(&self) -> bool {
        self.off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let backend = MockBackend::per_key();
        let recorder = backend.recorder();
        let mut handle = backend.open().unwrap();

        handle.set_uniform_color(Rgb::RED, 25).unwrap();
        handle.set_brightness(10).unwrap();
        handle.turn_off().unwrap();

        assert_eq!(
            recorder.writes(),
            vec![
                RecordedWrite::Uniform {
                    rgb: Rgb::RED,
                    brightness: 25
                },
                RecordedWrite::Brightness(10),
                RecordedWrite::Off,
            ]
        );
        assert!(handle.is_off());
    }

    #[test]
    fn test_injected_failure_consumed_once() {
        let backend = MockBackend::per_key();
        let recorder = backend.recorder();
        let mut handle = backend.open().unwrap();

        recorder.fail_next(BackendError::Busy("contended".into()));
        assert!(matches!(
            handle.set_uniform_color(Rgb::RED, 25),
            Err(BackendError::Busy(_))
        ));
        // The failure did not record a write, and the retry succeeds.
        handle.set_uniform_color(Rgb::RED, 25).unwrap();
        assert_eq!(recorder.write_count(), 1);
    }

    #[test]
    fn test_uniform_only_rejects_per_key() {
        let backend = MockBackend::uniform_only();
        let mut handle = backend.open().unwrap();
        let map = PerKeyMap::from([((0, 0), Rgb::RED)]);
        assert!(matches!(
            handle.set_key_colors(&map, 25),
            Err(BackendError::Unsupported(_))
        ));
    }
}
