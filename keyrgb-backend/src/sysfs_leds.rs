//! Kernel LED-class backend (`/sys/class/leds`).
//!
//! Drives keyboard backlights exposed by vendor drivers (Tuxedo/Clevo,
//! ThinkPad, ASUS WMI, HP Omen, Dell, System76). Uniform color via the
//! `multi_intensity` or `color` attributes when present, otherwise
//! brightness-only. No per-key addressing, no hardware effects.
//!
//! The sysfs root is overridable via `KEYRGB_SYSFS_LEDS_ROOT` so tests can
//! point at a scratch tree instead of real hardware.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    Backend, BackendError, Capabilities, DeviceHandle, EffectParams, PerKeyMap, ProbeResult, Rgb,
    BRIGHTNESS_MAX,
};

const DEFAULT_ROOT: &str = "/sys/class/leds";

fn is_candidate_led(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    n.contains("kbd")
        || n.contains("keyboard")
        || n.contains("tuxedo::kbd")
        || n.contains("ite_8291_lb")
        || n.contains("hp_omen::kbd")
        || n.contains("dell::kbd")
        || n.contains("tpacpi::kbd")
        || n.contains("asus::kbd")
        || n.contains("system76::kbd")
}

fn read_int(path: &Path) -> Result<u32, BackendError> {
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse::<u32>()
        .map_err(|e| BackendError::Other(format!("bad integer in {}: {e}", path.display())))
}

pub struct SysfsLedsBackend {
    root: PathBuf,
}

impl SysfsLedsBackend {
    pub const NAME: &'static str = "sysfs-leds";
    pub const PRIORITY: i32 = 80;

    pub fn new() -> Self {
        let root = std::env::var_os("KEYRGB_SYSFS_LEDS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        Self { root }
    }

    /// Explicit root, bypassing the environment (used by tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn find_led(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.root).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(is_candidate_led)
                        .unwrap_or(false)
            })
            .collect();

        // Prefer names that look like a keyboard backlight proper.
        candidates.sort_by_key(|p| {
            let name = p
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            (!name.contains("kbd"), name)
        });

        candidates
            .into_iter()
            .find(|dir| dir.join("brightness").exists() && dir.join("max_brightness").exists())
    }
}

impl Default for SysfsLedsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SysfsLedsBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn probe(&self) -> ProbeResult {
        let Some(led_dir) = self.find_led() else {
            return ProbeResult::unavailable("no matching sysfs LED");
        };
        let brightness = led_dir.join("brightness");

        if fs::File::open(&brightness).is_err() {
            return ProbeResult::unavailable("brightness not readable")
                .with_identifier("brightness", brightness.display().to_string());
        }
        // Open for write without truncating; a failure here means the udev
        // rule granting user access is missing.
        if fs::OpenOptions::new().write(true).open(&brightness).is_err() {
            return ProbeResult::unavailable("brightness not writable (udev permissions missing?)")
                .with_identifier("brightness", brightness.display().to_string());
        }

        ProbeResult::available(85, "sysfs LED present")
            .with_identifier("brightness", brightness.display().to_string())
            .with_identifier(
                "max_brightness",
                led_dir.join("max_brightness").display().to_string(),
            )
    }

    fn open(&self) -> Result<Box<dyn DeviceHandle>, BackendError> {
        let led_dir = self.find_led().ok_or(BackendError::Unavailable)?;
        let max = read_int(&led_dir.join("max_brightness"))?.max(1);
        let has_multi_intensity = led_dir.join("multi_intensity").exists();
        let has_color_attr = led_dir.join("color").exists();
        debug!(
            led = %led_dir.display(),
            max,
            has_multi_intensity,
            has_color_attr,
            "opened sysfs LED"
        );
        Ok(Box::new(SysfsLedHandle {
            led_dir,
            max,
            has_multi_intensity,
            has_color_attr,
            gone: false,
        }))
    }
}

pub struct SysfsLedHandle {
    led_dir: PathBuf,
    /// Cached `max_brightness`; fixed for the handle's lifetime.
    max: u32,
    has_multi_intensity: bool,
    has_color_attr: bool,
    gone: bool,
}

impl SysfsLedHandle {
    fn write_attr(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        if self.gone {
            return Err(BackendError::DeviceGone);
        }
        let result = fs::write(self.led_dir.join(name), value).map_err(BackendError::from);
        if let Err(ref e) = result {
            if e.is_terminal() {
                self.gone = true;
            }
        }
        result
    }

    /// Map the core 0..=50 scale into this LED's 0..=max range.
    fn to_sysfs(&self, brightness: u8) -> u32 {
        let b = brightness.min(BRIGHTNESS_MAX) as f32;
        ((b / BRIGHTNESS_MAX as f32) * self.max as f32).round() as u32
    }

    fn write_brightness(&mut self, brightness: u8) -> Result<(), BackendError> {
        let value = self.to_sysfs(brightness);
        self.write_attr("brightness", &format!("{value}\n"))
    }
}

impl DeviceHandle for SysfsLedHandle {
    fn capabilities(&self) -> Capabilities {
        Capabilities::uniform_only()
    }

    fn set_uniform_color(&mut self, rgb: Rgb, brightness: u8) -> Result<(), BackendError> {
        if self.has_multi_intensity {
            // Tuxedo/Clevo multicolor LED.
            self.write_attr("multi_intensity", &format!("{} {} {}\n", rgb.r, rgb.g, rgb.b))?;
        } else if self.has_color_attr {
            // ITE kernel driver color attribute.
            self.write_attr(
                "color",
                &format!("{:02x}{:02x}{:02x}\n", rgb.r, rgb.g, rgb.b),
            )?;
        }
        // Brightness-only LEDs just get the brightness component.
        self.write_brightness(brightness)
    }

    fn set_key_colors(&mut self, _map: &PerKeyMap, _brightness: u8) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("per-key"))
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), BackendError> {
        self.write_brightness(level)
    }

    fn set_hardware_effect(
        &mut self,
        _name: &str,
        _params: &EffectParams,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("hardware effects"))
    }

    fn turn_off(&mut self) -> Result<(), BackendError> {
        self.write_brightness(0)
    }

    fn is_off(&self) -> bool {
        read_int(&self.led_dir.join("brightness"))
            .map(|v| v == 0)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn scratch_leds_root() -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "keyrgb-sysfs-test-{}-{seq}",
            std::process::id()
        ));
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn make_led(root: &Path, name: &str, max: u32) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("brightness"), "0\n").unwrap();
        fs::write(dir.join("max_brightness"), format!("{max}\n")).unwrap();
        dir
    }

    #[test]
    fn test_candidate_matching() {
        assert!(is_candidate_led("tpacpi::kbd_backlight"));
        assert!(is_candidate_led("system76::kbd_backlight"));
        assert!(is_candidate_led("rgb:kbd_backlight"));
        assert!(!is_candidate_led("input3::capslock"));
        assert!(!is_candidate_led("phy0-led"));
    }

    #[test]
    fn test_probe_empty_root() {
        let root = scratch_leds_root();
        let backend = SysfsLedsBackend::with_root(&root);
        let probe = backend.probe();
        assert!(!probe.available);
    }

    #[test]
    fn test_probe_finds_led() {
        let root = scratch_leds_root();
        make_led(&root, "tuxedo::kbd_backlight", 255);
        let backend = SysfsLedsBackend::with_root(&root);
        let probe = backend.probe();
        assert!(probe.available);
        assert_eq!(probe.confidence, 85);
        assert!(probe.identifiers.contains_key("brightness"));
    }

    #[test]
    fn test_brightness_scaling() {
        let root = scratch_leds_root();
        let dir = make_led(&root, "dell::kbd_backlight", 255);
        let backend = SysfsLedsBackend::with_root(&root);
        let mut handle = backend.open().unwrap();

        handle.set_brightness(50).unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "255");

        handle.set_brightness(25).unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "128");

        handle.turn_off().unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "0");
        assert!(handle.is_off());
    }

    #[test]
    fn test_multi_intensity_color() {
        let root = scratch_leds_root();
        let dir = make_led(&root, "rgb:kbd_backlight", 100);
        fs::write(dir.join("multi_intensity"), "0 0 0\n").unwrap();

        let backend = SysfsLedsBackend::with_root(&root);
        let mut handle = backend.open().unwrap();
        handle.set_uniform_color(Rgb::new(10, 20, 30), 50).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("multi_intensity")).unwrap().trim(),
            "10 20 30"
        );
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap().trim(), "100");
    }

    #[test]
    fn test_color_attr_hex() {
        let root = scratch_leds_root();
        let dir = make_led(&root, "ite_8291_lb::kbd_backlight", 50);
        fs::write(dir.join("color"), "000000\n").unwrap();

        let backend = SysfsLedsBackend::with_root(&root);
        let mut handle = backend.open().unwrap();
        handle.set_uniform_color(Rgb::new(255, 128, 0), 25).unwrap();

        assert_eq!(fs::read_to_string(dir.join("color")).unwrap().trim(), "ff8000");
    }

    #[test]
    fn test_per_key_unsupported() {
        let root = scratch_leds_root();
        make_led(&root, "asus::kbd_backlight", 3);
        let backend = SysfsLedsBackend::with_root(&root);
        let mut handle = backend.open().unwrap();
        let map = PerKeyMap::from([((0u8, 0u8), Rgb::RED)]);
        assert!(matches!(
            handle.set_key_colors(&map, 25),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn test_removed_led_is_device_gone() {
        let root = scratch_leds_root();
        let dir = make_led(&root, "hp_omen::kbd_backlight", 255);
        let backend = SysfsLedsBackend::with_root(&root);
        let mut handle = backend.open().unwrap();

        fs::remove_dir_all(&dir).unwrap();
        let err = handle.set_brightness(25).unwrap_err();
        assert!(err.is_terminal());
        // Terminal: every later write is refused without touching the fs.
        assert!(matches!(
            handle.set_brightness(25),
            Err(BackendError::DeviceGone)
        ));
    }
}
