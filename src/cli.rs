// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keyrgb")]
#[command(author, version, about = "Keyboard RGB backlight control")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/keyrgb/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Backend override: ite8291r3, sysfs-leds, auto
    #[arg(long, global = true, value_name = "NAME")]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the lighting daemon (effects, power policy, reconnects)
    #[command(visible_alias = "daemon")]
    Run,

    /// Probe all backends and show which are usable
    #[command(visible_alias = "ls")]
    Backends {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Dump a diagnostics snapshot as JSON
    #[command(visible_alias = "diag")]
    Diagnose,

    /// List available effect names
    Effects,

    /// Set a static color
    #[command(visible_alias = "color")]
    SetColor {
        /// "#RRGGBB" or a color name (red, cyan, ...)
        color: String,
        /// Brightness 0-50 (default: from config)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=50))]
        brightness: Option<u8>,
    },

    /// Start an effect. Hardware effects are written once and free-run;
    /// software effects keep the process in the foreground.
    #[command(visible_alias = "effect")]
    SetEffect {
        /// Effect name (see `keyrgb effects`)
        name: String,
        /// Speed 0-10
        #[arg(long, default_value = "5", value_parser = clap::value_parser!(u8).range(0..=10))]
        speed: u8,
        /// Effect color for effects that take one
        #[arg(long)]
        color: Option<String>,
        /// Brightness 0-50 (default: from config)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=50))]
        brightness: Option<u8>,
    },

    /// Set brightness only, keeping the current colors
    #[command(visible_alias = "sb")]
    SetBrightness {
        /// Brightness 0-50
        #[arg(value_parser = clap::value_parser!(u8).range(0..=50))]
        level: u8,
    },

    /// Turn the backlight off
    Off,
}
