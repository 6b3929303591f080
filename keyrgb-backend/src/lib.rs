//! Device backend abstraction for KeyRGB keyboard lighting.
//!
//! This crate provides a unified interface over the small family of laptop
//! keyboard backlight controllers KeyRGB drives:
//!
//! - `ite8291r3`: ITE 8291 rev 3 USB controllers (Tongfang/WootBook rebrands)
//! - `sysfs-leds`: kernel LED-class backlights (Tuxedo, ThinkPad, ASUS, ...)
//!
//! Backends are a closed, compile-time set registered in [`registry`]; each
//! one answers a fast read-only [`Backend::probe`] and, when selected, opens
//! exactly one [`DeviceHandle`]. All hardware byte layouts are owned by the
//! individual backend modules, not by this contract.

pub mod error;
pub mod ite8291r3;
pub mod mock;
pub mod registry;
pub mod sysfs_leds;
pub mod types;

pub use error::BackendError;
pub use registry::{default_specs, select_backend, BackendSpec, Selection};
pub use types::{
    Capabilities, EffectParams, KeyPos, PerKeyMap, ProbeResult, Rgb, BRIGHTNESS_MAX,
};

/// A driver for one class of lighting hardware.
///
/// `probe` must be fast (target < 100 ms), read-only, and must never mutate
/// hardware state. `open` acquires the actual device resource.
pub trait Backend: Send + Sync {
    /// Stable backend name (used for explicit selection via `KEYRGB_BACKEND`).
    fn name(&self) -> &'static str;

    /// Static tie-break priority (higher wins at equal probe confidence).
    fn priority(&self) -> i32;

    /// Availability/capability check without opening the device.
    fn probe(&self) -> ProbeResult;

    /// Open the device and return the single live handle.
    fn open(&self) -> Result<Box<dyn DeviceHandle>, BackendError>;
}

/// An open hardware resource. Exactly one handle is live system-wide; after a
/// `DeviceGone` failure the handle is invalidated and must never be reused.
///
/// Color and brightness always travel together in one call so a frame can
/// never be observed with stale brightness and fresh color (or vice versa).
pub trait DeviceHandle: Send {
    /// Capability flags, fixed for the lifetime of the handle.
    fn capabilities(&self) -> Capabilities;

    /// Set every LED to `rgb` at `brightness` (0..=50) in one operation.
    fn set_uniform_color(&mut self, rgb: Rgb, brightness: u8) -> Result<(), BackendError>;

    /// Write a per-key frame at `brightness`. Fails with `Unsupported` when
    /// `capabilities().per_key` is false.
    fn set_key_colors(&mut self, map: &PerKeyMap, brightness: u8) -> Result<(), BackendError>;

    /// Change brightness only (0..=50), preserving the current colors.
    fn set_brightness(&mut self, level: u8) -> Result<(), BackendError>;

    /// Select a firmware-resident effect. Fails with `Unsupported` when
    /// `capabilities().hardware_effects` is false or the name is unknown.
    fn set_hardware_effect(&mut self, name: &str, params: &EffectParams)
        -> Result<(), BackendError>;

    /// Turn all LEDs off.
    fn turn_off(&mut self) -> Result<(), BackendError>;

    /// Best-effort "is the backlight currently off" check.
    fn is_off(&self) -> bool;
}
