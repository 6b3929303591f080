//! ITE 8291 rev 3 USB backend (Tongfang/WootBook and friends).
//!
//! Talks the 8291r3 feature-report dialect via hidapi: 8-byte control
//! packets for mode/brightness/palette, interrupt OUT row packets for
//! per-key frames. This module owns the byte layout; nothing outside it
//! knows these constants.

use std::collections::BTreeMap;

use hidapi::{HidApi, HidDevice};
use tracing::debug;

use crate::{
    Backend, BackendError, Capabilities, DeviceHandle, EffectParams, PerKeyMap, ProbeResult, Rgb,
};

pub const VENDOR_ID: u16 = 0x048d;

/// PIDs this backend can actually drive.
///
/// Includes the upstream ite8291r3-ctl set plus newer Tongfang iterations
/// seen on WootBook rebrands.
const SUPPORTED_PIDS: [u16; 5] = [0x6004, 0x6006, 0x6008, 0x600b, 0xce00];

/// ITE controllers that enumerate similarly but speak a different protocol
/// family ("Fusion 2" in community tooling). Claiming these would let
/// auto-selection talk the wrong dialect to the device, so their presence is
/// a *negative* probe.
const UNSUPPORTED_PIDS: [u16; 3] = [0x8297, 0x5702, 0xc966];

pub const NUM_ROWS: u8 = 6;
pub const NUM_COLS: u8 = 21;

// Control packet command bytes.
const CMD_STATE: u8 = 0x08;
const CMD_ROW_ANNOUNCE: u8 = 0x16;
const CMD_PALETTE: u8 = 0x14;

const SUB_OFF: u8 = 0x01;
const SUB_EFFECT: u8 = 0x02;

/// "User picture" mode id: the controller displays the streamed row matrix.
const EFFECT_USER: u8 = 0x33;

/// Palette slot programmed for color-taking hardware effects.
const PALETTE_SLOT: u8 = 0x01;

/// Firmware effect table. Names are the stable KeyRGB effect names.
const HW_EFFECTS: [(&str, u8); 8] = [
    ("rainbow", 0x05),
    ("breathing", 0x02),
    ("wave", 0x03),
    ("ripple", 0x06),
    ("marquee", 0x09),
    ("raindrop", 0x0a),
    ("aurora", 0x0e),
    ("fireworks", 0x11),
];

/// Map a stable effect name to its firmware id.
pub fn hw_effect_id(name: &str) -> Option<u8> {
    HW_EFFECTS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// All hardware effect names, in catalog order.
pub fn hw_effect_names() -> Vec<&'static str> {
    HW_EFFECTS.iter().map(|(n, _)| *n).collect()
}

/// The controller's speed scale is inverted relative to the UI:
/// UI 10 = fastest, hardware 10 = slowest.
pub fn hw_speed(ui_speed: u8) -> u8 {
    11u8.saturating_sub(ui_speed.min(10)).min(10)
}

/// Pack one matrix row into an interrupt OUT packet.
///
/// Layout: report id, then column-planar channel banks (all blues, all
/// greens, all reds), which is how the 8291r3 latches a row.
pub fn pack_row(row: u8, colors: &BTreeMap<u8, Rgb>) -> Vec<u8> {
    let cols = NUM_COLS as usize;
    let mut buf = vec![0u8; 1 + 3 * cols];
    let _ = row; // row is carried by the preceding announce packet
    for (col, rgb) in colors {
        let c = *col as usize;
        if c >= cols {
            continue;
        }
        buf[1 + c] = rgb.b;
        buf[1 + cols + c] = rgb.g;
        buf[1 + 2 * cols + c] = rgb.r;
    }
    buf
}

pub struct Ite8291r3Backend;

impl Ite8291r3Backend {
    pub const NAME: &'static str = "ite8291r3";
    pub const PRIORITY: i32 = 100;

    pub fn new() -> Self {
        Self
    }
}

impl Default for Ite8291r3Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Ite8291r3Backend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn probe(&self) -> ProbeResult {
        // Test/CI hook: report plausible availability without touching USB.
        if std::env::var("KEYRGB_DISABLE_USB_SCAN").as_deref() == Ok("1") {
            return ProbeResult::available(60, "usb scan disabled");
        }

        let api = match HidApi::new() {
            Ok(api) => api,
            Err(e) => return ProbeResult::unavailable(format!("hidapi init failed: {e}")),
        };

        for info in api.device_list() {
            if info.vendor_id() != VENDOR_ID {
                continue;
            }
            let pid = info.product_id();
            if UNSUPPORTED_PIDS.contains(&pid) {
                return ProbeResult::unavailable(format!(
                    "usb device present but unsupported by ite8291r3 backend \
                     ({VENDOR_ID:#06x}:{pid:#06x})"
                ))
                .with_identifier("usb_vid", format!("{VENDOR_ID:#06x}"))
                .with_identifier("usb_pid", format!("{pid:#06x}"));
            }
            if SUPPORTED_PIDS.contains(&pid) {
                return ProbeResult::available(
                    90,
                    format!("usb device present ({VENDOR_ID:#06x}:{pid:#06x})"),
                )
                .with_identifier("usb_vid", format!("{VENDOR_ID:#06x}"))
                .with_identifier("usb_pid", format!("{pid:#06x}"));
            }
        }

        ProbeResult::unavailable("no matching usb device")
    }

    fn open(&self) -> Result<Box<dyn DeviceHandle>, BackendError> {
        let api = HidApi::new().map_err(BackendError::from)?;
        let info = api
            .device_list()
            .find(|i| i.vendor_id() == VENDOR_ID && SUPPORTED_PIDS.contains(&i.product_id()))
            .ok_or(BackendError::Unavailable)?;
        let pid = info.product_id();
        let device = api.open(VENDOR_ID, pid).map_err(BackendError::from)?;
        debug!(vid = VENDOR_ID, pid, "opened ite8291r3 device");
        Ok(Box::new(Ite8291r3Handle {
            device,
            gone: false,
            off: false,
            user_mode: false,
            brightness: 0,
        }))
    }
}

pub struct Ite8291r3Handle {
    device: HidDevice,
    /// Set once a write observes DeviceGone; the handle then refuses all
    /// further I/O so a stale reference can never touch a re-enumerated
    /// device.
    gone: bool,
    off: bool,
    user_mode: bool,
    brightness: u8,
}

impl Ite8291r3Handle {
    fn control(&mut self, payload: [u8; 8]) -> Result<(), BackendError> {
        if self.gone {
            return Err(BackendError::DeviceGone);
        }
        let mut buf = [0u8; 9];
        buf[1..].copy_from_slice(&payload);
        self.guard(self.device.send_feature_report(&buf).map_err(BackendError::from))
    }

    fn interrupt_write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        if self.gone {
            return Err(BackendError::DeviceGone);
        }
        self.guard(self.device.write(buf).map(|_| ()).map_err(BackendError::from))
    }

    fn guard(&mut self, result: Result<(), BackendError>) -> Result<(), BackendError> {
        if let Err(ref e) = result {
            if e.is_terminal() {
                self.gone = true;
            }
        }
        result
    }

    /// Switch the controller into user-picture mode so streamed rows show.
    fn enable_user_mode(&mut self, brightness: u8) -> Result<(), BackendError> {
        self.control([
            CMD_STATE, SUB_EFFECT, EFFECT_USER, 0x00, brightness, 0x00, 0x00, 0x00,
        ])?;
        self.user_mode = true;
        Ok(())
    }

    fn write_rows(&mut self, map: &PerKeyMap, brightness: u8) -> Result<(), BackendError> {
        if !self.user_mode || self.brightness != brightness {
            self.enable_user_mode(brightness)?;
        }

        let mut rows: BTreeMap<u8, BTreeMap<u8, Rgb>> = BTreeMap::new();
        for ((row, col), rgb) in map {
            rows.entry(*row).or_default().insert(*col, *rgb);
        }

        for row in 0..NUM_ROWS {
            let colors = rows.remove(&row).unwrap_or_default();
            self.control([CMD_ROW_ANNOUNCE, 0x00, row, 0x00, 0x00, 0x00, 0x00, 0x00])?;
            let packet = pack_row(row, &colors);
            self.interrupt_write(&packet)?;
        }

        self.brightness = brightness;
        self.off = brightness == 0;
        Ok(())
    }
}

impl DeviceHandle for Ite8291r3Handle {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            per_key: true,
            hardware_effects: true,
            palette: true,
            matrix: Some((NUM_ROWS, NUM_COLS)),
        }
    }

    fn set_uniform_color(&mut self, rgb: Rgb, brightness: u8) -> Result<(), BackendError> {
        // The 8291r3 has no uniform-color register; a full user-mode grid is
        // the one-write equivalent.
        let mut map = PerKeyMap::new();
        for row in 0..NUM_ROWS {
            for col in 0..NUM_COLS {
                map.insert((row, col), rgb);
            }
        }
        self.write_rows(&map, brightness)
    }

    fn set_key_colors(&mut self, map: &PerKeyMap, brightness: u8) -> Result<(), BackendError> {
        self.write_rows(map, brightness)
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), BackendError> {
        let level = level.min(crate::BRIGHTNESS_MAX);
        if self.user_mode {
            self.enable_user_mode(level)?;
        } else {
            self.control([CMD_STATE, SUB_EFFECT, 0x00, 0x00, level, 0x00, 0x00, 0x00])?;
        }
        self.brightness = level;
        self.off = level == 0;
        Ok(())
    }

    fn set_hardware_effect(
        &mut self,
        name: &str,
        params: &EffectParams,
    ) -> Result<(), BackendError> {
        let Some(effect_id) = hw_effect_id(name) else {
            return Err(BackendError::Unsupported("unknown hardware effect"));
        };

        let mut color_id = 0x00;
        if let Some(rgb) = params.color {
            // Color-taking effects reference a palette slot; program it first.
            self.control([CMD_PALETTE, 0x00, PALETTE_SLOT, rgb.r, rgb.g, rgb.b, 0x00, 0x00])?;
            color_id = PALETTE_SLOT;
        }

        let brightness = params.brightness.min(crate::BRIGHTNESS_MAX);
        self.control([
            CMD_STATE,
            SUB_EFFECT,
            effect_id,
            hw_speed(params.speed),
            brightness,
            color_id,
            0x00,
            0x00,
        ])?;
        self.user_mode = false;
        self.brightness = brightness;
        self.off = false;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), BackendError> {
        self.control([CMD_STATE, SUB_OFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])?;
        self.user_mode = false;
        self.brightness = 0;
        self.off = true;
        Ok(())
    }

    fn is_off(&self) -> bool {
        self.off
    }
}
