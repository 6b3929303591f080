//! KeyRGB command-line interface and daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use keyrgb_backend::{ite8291r3, select_backend, DeviceHandle, Rgb, BRIGHTNESS_MAX};
use tracing::{info, warn};

use keyrgb::config::Config;
use keyrgb::diagnostics::probe_all;
use keyrgb::engine::{Engine, EngineConfig};
use keyrgb::intent::{LightingIntent, SoftwareEffectKind};
use keyrgb::power_supply::AcMonitor;
use keyrgb::profile::Profile;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keyrgb=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.clone())?;
    let requested = cli
        .backend
        .clone()
        .unwrap_or_else(|| config.backend.clone());

    match cli.command {
        None | Some(Commands::Run) => run_daemon(&requested, config),
        Some(Commands::Backends { json }) => backends(json),
        Some(Commands::Diagnose) => diagnose(&requested, &config),
        Some(Commands::Effects) => {
            println!("software:");
            for kind in SoftwareEffectKind::ALL {
                println!("  {}", kind.name());
            }
            println!("hardware (ite8291r3):");
            for name in ite8291r3::hw_effect_names() {
                println!("  {name}");
            }
            Ok(())
        }
        Some(Commands::SetColor { color, brightness }) => {
            let rgb = Rgb::parse(&color).with_context(|| format!("invalid color {color:?}"))?;
            let (mut handle, backend) = open(&requested)?;
            let level = brightness.unwrap_or(config.brightness);
            handle.set_uniform_color(rgb, level)?;
            info!(backend, color = %rgb.to_hex(), level, "color set");
            Ok(())
        }
        Some(Commands::SetBrightness { level }) => {
            let (mut handle, backend) = open(&requested)?;
            handle.set_brightness(level)?;
            info!(backend, level, "brightness set");
            Ok(())
        }
        Some(Commands::Off) => {
            let (mut handle, backend) = open(&requested)?;
            handle.turn_off()?;
            info!(backend, "backlight off");
            Ok(())
        }
        Some(Commands::SetEffect {
            name,
            speed,
            color,
            brightness,
        }) => set_effect(&requested, config, &name, speed, color, brightness),
    }
}

fn open(requested: &str) -> Result<(Box<dyn DeviceHandle>, String)> {
    let req = (requested != "auto").then_some(requested);
    let selection =
        select_backend(req).context("no usable backend found (see `keyrgb backends`)")?;
    let name = selection.backend.name().to_string();
    let handle = selection
        .backend
        .open()
        .with_context(|| format!("opening backend {name}"))?;
    Ok((handle, name))
}

fn backends(json: bool) -> Result<()> {
    let reports = probe_all();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for report in reports {
        let status = if report.available {
            format!("available (confidence {})", report.confidence)
        } else {
            "unavailable".to_string()
        };
        println!("{:<12} {:<28} {}", report.name, status, report.reason);
        for (key, value) in &report.identifiers {
            println!("{:<12}   {key}: {value}", "");
        }
    }
    Ok(())
}

fn diagnose(requested: &str, config: &Config) -> Result<()> {
    let engine = Engine::new(engine_config(config));
    if let Ok((handle, backend)) = open(requested) {
        engine.attach(handle, backend);
    }
    println!("{}", serde_json::to_string_pretty(&engine.snapshot())?);
    Ok(())
}

fn engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        reactive: config.reactive.clone(),
        power: config.power.clone(),
        ..EngineConfig::default()
    }
}

fn set_effect(
    requested: &str,
    config: Config,
    name: &str,
    speed: u8,
    color: Option<String>,
    brightness: Option<u8>,
) -> Result<()> {
    let rgb = match &color {
        Some(s) => Rgb::parse(s).with_context(|| format!("invalid color {s:?}"))?,
        None => config.effect_color().unwrap_or(Rgb::WHITE),
    };
    let level = brightness.unwrap_or(config.brightness).min(BRIGHTNESS_MAX);

    if let Some(kind) = SoftwareEffectKind::from_name(name) {
        // Host-rendered: stay in the foreground and animate.
        let intent = LightingIntent::SoftwareEffect {
            kind,
            speed,
            color: rgb,
        };
        return run_loop(requested, config, intent, level);
    }

    // Otherwise treat it as a firmware effect: one write, then the
    // controller free-runs it.
    let (mut handle, backend) = open(requested)?;
    handle.set_hardware_effect(
        name,
        &keyrgb_backend::EffectParams {
            speed,
            brightness: level,
            color: Some(rgb),
        },
    )?;
    info!(backend, effect = name, speed, level, "hardware effect set");
    Ok(())
}

fn run_daemon(requested: &str, config: Config) -> Result<()> {
    let intent = if config.lighting.mode == "profile" {
        let profile = Profile::load(&config.lighting.effect)?;
        LightingIntent::PerKey(profile.per_key_map(None)?)
    } else {
        config.startup_intent()?
    };
    let brightness = config.brightness;
    run_loop(requested, config, intent, brightness)
}

/// Shared foreground loop for the daemon and software effects: start the
/// engine, wire power events and reconnects, block until SIGINT/SIGTERM.
fn run_loop(requested: &str, config: Config, intent: LightingIntent, brightness: u8) -> Result<()> {
    let engine = Arc::new(Engine::new(engine_config(&config)));

    match open(requested) {
        Ok((handle, backend)) => engine.attach(handle, backend),
        Err(err) => warn!(%err, "no device yet, waiting for one"),
    }
    if !engine.snapshot().connected && requested != "auto" {
        // An explicit backend that is not usable should fail loudly rather
        // than idle forever.
        bail!("requested backend {requested:?} is not usable");
    }

    if config.lighting.mode == "profile" {
        if let Ok(profile) = Profile::load(&config.lighting.effect) {
            engine.set_keymap(profile.keymap());
        }
    }

    let reselect_requested = requested.to_string();
    engine.set_reselector(Box::new(move || {
        open(&reselect_requested)
            .map_err(|err| {
                warn!(%err, "reconnect attempt failed");
                err
            })
            .ok()
    }));

    engine.set_startup_brightness(brightness);
    engine.apply_intent(intent);
    engine.start();

    let running = Arc::new(AtomicBool::new(true));
    {
        let engine = Arc::clone(&engine);
        let running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("keyrgb-ac".to_string())
            .spawn(move || {
                AcMonitor::new().run(running, |event| engine.on_power_event(event));
            })
            .context("spawning AC monitor thread")?;
    }

    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("installing signal handler")?;

    info!("running, press Ctrl-C to exit");
    let _ = stop_rx.recv();
    info!("shutting down");
    running.store(false, Ordering::SeqCst);
    engine.shutdown();
    Ok(())
}
