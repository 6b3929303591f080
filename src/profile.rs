//! Per-key lighting profiles.
//!
//! A profile is a JSON document with two maps: a keymap from key identifiers
//! ("a", "enter", "kp_4") to matrix positions, and a color layout keyed by
//! "row,col" strings. Profiles live next to the config as
//! `$XDG_CONFIG_HOME/keyrgb/profiles/<name>.json`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use keyrgb_backend::{KeyPos, PerKeyMap, Rgb};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Key identifier -> (row, col).
    #[serde(default)]
    pub keymap: HashMap<String, KeyPos>,
    /// "row,col" -> "#RRGGBB". String keys because JSON objects cannot key
    /// on arrays.
    #[serde(default)]
    pub colors: HashMap<String, String>,
    /// Fill for keys the layout does not mention.
    #[serde(default)]
    pub default_color: Option<String>,
}

impl Profile {
    pub fn dir() -> Option<PathBuf> {
        let config = crate::config::Config::default_path()?;
        Some(config.parent()?.join("profiles"))
    }

    pub fn load(name: &str) -> Result<Self> {
        if name.contains(['/', '\\']) || name.contains("..") {
            bail!("invalid profile name {name:?}");
        }
        let dir = Self::dir().context("no profile directory resolvable")?;
        let path = dir.join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing profile {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let profile: Profile = serde_json::from_str(text)?;
        // Surface bad positions and colors at load time, not render time.
        profile.per_key_map(None)?;
        Ok(profile)
    }

    /// Resolve the color layout into a frame, optionally for a known matrix
    /// size (positions outside it are rejected).
    pub fn per_key_map(&self, matrix: Option<(u8, u8)>) -> Result<PerKeyMap> {
        let mut map = PerKeyMap::new();
        if let Some(hex) = &self.default_color {
            let fill = Rgb::parse(hex).with_context(|| format!("invalid default_color {hex:?}"))?;
            if let Some((rows, cols)) = matrix {
                for r in 0..rows {
                    for c in 0..cols {
                        map.insert((r, c), fill);
                    }
                }
            }
        }
        for (pos, hex) in &self.colors {
            let (r, c) = parse_pos(pos)?;
            if let Some((rows, cols)) = matrix {
                if r >= rows || c >= cols {
                    bail!("position {pos} outside {rows}x{cols} matrix");
                }
            }
            let rgb = Rgb::parse(hex).with_context(|| format!("invalid color {hex:?} at {pos}"))?;
            map.insert((r, c), rgb);
        }
        Ok(map)
    }

    pub fn keymap(&self) -> HashMap<String, KeyPos> {
        self.keymap.clone()
    }
}

fn parse_pos(s: &str) -> Result<KeyPos> {
    let (r, c) = s
        .split_once(',')
        .with_context(|| format!("position {s:?} is not \"row,col\""))?;
    Ok((
        r.trim().parse().with_context(|| format!("bad row in {s:?}"))?,
        c.trim().parse().with_context(|| format!("bad col in {s:?}"))?,
    ))
}
