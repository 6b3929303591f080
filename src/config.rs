//! Daemon configuration.
//!
//! TOML file at `$XDG_CONFIG_HOME/keyrgb/config.toml` (falling back to
//! `~/.config/keyrgb/config.toml`). Every field has a default, so a missing
//! file or a partial file both work.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use keyrgb_backend::{Rgb, BRIGHTNESS_MAX};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::intent::{LightingIntent, SoftwareEffectKind};
use crate::power::PowerPolicyConfig;

/// Serialize `Duration` fields as seconds (fractional allowed).
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be >= 0 seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend name or "auto".
    pub backend: String,
    /// Startup brightness, 0..=50.
    pub brightness: u8,
    pub lighting: LightingConfig,
    pub reactive: ReactiveConfig,
    pub power: PowerPolicyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            brightness: 25,
            lighting: LightingConfig::default(),
            reactive: ReactiveConfig::default(),
            power: PowerPolicyConfig::default(),
        }
    }
}

/// Startup lighting selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// "static", "hardware", "software", "profile", or "off".
    pub mode: String,
    /// Effect name (hardware/software modes) or profile name.
    pub effect: String,
    pub color: String,
    /// UI speed 0..=10.
    pub speed: u8,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            mode: "static".to_string(),
            effect: String::new(),
            color: "#00a0ff".to_string(),
            speed: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Brightness a full-intensity pulse may transiently reach, 0..=50.
    /// Zero disables the boost (pulses stay at the baseline level).
    pub brightness_boost: u8,
    /// Inject a synthetic pulse after this much input silence; 0 disables.
    #[serde(with = "duration_secs")]
    pub synthetic_after: Duration,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            brightness_boost: 40,
            synthetic_after: Duration::from_secs(8),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keyrgb").join("config.toml"))
    }

    /// Load from `path`, or the default location. A missing file yields the
    /// defaults; a malformed file is an error (never silently ignored).
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path.or_else(Self::default_path) else {
            info!("no config directory resolvable, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.brightness > BRIGHTNESS_MAX {
            bail!("brightness {} out of range 0..=50", self.brightness);
        }
        if self.lighting.speed > 10 {
            bail!("speed {} out of range 0..=10", self.lighting.speed);
        }
        Ok(())
    }

    pub fn effect_color(&self) -> Result<Rgb> {
        Rgb::parse(&self.lighting.color)
            .with_context(|| format!("invalid color {:?}", self.lighting.color))
    }

    /// Build the startup intent. Profile mode is resolved by the caller
    /// (it needs the profile store).
    pub fn startup_intent(&self) -> Result<LightingIntent> {
        let color = self.effect_color()?;
        match self.lighting.mode.as_str() {
            "off" => Ok(LightingIntent::Off),
            "static" => Ok(LightingIntent::StaticColor(color)),
            "hardware" => {
                if self.lighting.effect.is_empty() {
                    bail!("lighting.mode = \"hardware\" requires lighting.effect");
                }
                Ok(LightingIntent::HardwareEffect {
                    name: self.lighting.effect.clone(),
                    speed: self.lighting.speed,
                    color: Some(color),
                })
            }
            "software" => {
                let kind = SoftwareEffectKind::from_name(&self.lighting.effect)
                    .with_context(|| format!("unknown software effect {:?}", self.lighting.effect))?;
                Ok(LightingIntent::SoftwareEffect {
                    kind,
                    speed: self.lighting.speed,
                    color,
                })
            }
            "profile" => bail!("profile mode must be resolved through the profile store"),
            other => bail!("unknown lighting.mode {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.brightness, 25);
        assert_eq!(back.power.battery_brightness, Some(15));
        assert_eq!(back.power.debounce, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            brightness = 40
            [lighting]
            mode = "software"
            effect = "rainbow_wave"
            "#,
        )
        .unwrap();
        assert_eq!(config.brightness, 40);
        assert_eq!(config.lighting.speed, 5);
        assert!(config.power.enabled);
        let intent = config.startup_intent().unwrap();
        assert!(matches!(
            intent,
            LightingIntent::SoftwareEffect {
                kind: SoftwareEffectKind::RainbowWave,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_effect_rejected() {
        let config: Config = toml::from_str(
            r#"
            [lighting]
            mode = "software"
            effect = "disco"
            "#,
        )
        .unwrap();
        assert!(config.startup_intent().is_err());
    }

    #[test]
    fn test_out_of_range_brightness_rejected() {
        let config: Config = toml::from_str("brightness = 80").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_secs_rejects_negative() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [power]
            debounce = -1.0
            "#,
        );
        assert!(result.is_err());
    }
}
