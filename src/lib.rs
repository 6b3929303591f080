// KeyRGB - Keyboard RGB backlight control core
// Effects engine, power/brightness policy, and reactive input handling

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod input;
pub mod intent;
pub mod power;
pub mod power_supply;
pub mod profile;

pub use config::Config;
pub use diagnostics::{probe_all, BackendReport, Snapshot};
pub use engine::{Engine, EngineConfig};
pub use input::{InputAdapter, Stimulus};
pub use intent::{BrightnessState, LightingIntent, SoftwareEffectKind};
pub use power::{PolicyAction, PowerEvent, PowerPolicy, PowerPolicyConfig};
pub use power_supply::AcMonitor;
pub use profile::Profile;
