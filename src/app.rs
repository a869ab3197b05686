//! Host bootstrap: config, audio stream, initial module, watcher, console

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::device::list_output_devices;
use crate::audio::engine::{AudioCallbackEngine, AudioEngine};
use crate::audio::history::HistoryRing;
use crate::audio::params::ParameterChannel;
use crate::audio::plugin::{cleanup_scratch_dir, LiveModule, ModuleHost, ShadowCopy};
use crate::commands::build::BuildStep;
use crate::commands::control::ControlSurface;
use crate::commands::export::SnapshotEncoder;
use crate::commands::logging::init_logging;
use crate::commands::reload::{ReloadCoordinator, ReloadSettings};
use crate::config::HostConfig;

#[derive(Debug, Parser)]
#[command(name = "hotdsp")]
#[command(version, about = "Real-time audio host with hot-reloadable DSP modules")]
pub struct Cli {
    /// Config file (default: <config dir>/hotdsp/config.json if present)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output device name
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Module binary to load
    #[arg(long, short = 'm')]
    pub module: Option<PathBuf>,

    /// Source file to watch for edits
    #[arg(long, short = 's')]
    pub source: Option<PathBuf>,

    /// Skip the build before the first load
    #[arg(long)]
    pub no_build: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    fn apply(&self, config: &mut HostConfig) {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(module) = &self.module {
            config.module.binary_path = module.clone();
        }
        if let Some(source) = &self.source {
            config.module.source_path = source.clone();
        }
        if self.no_build {
            config.module.build_on_start = false;
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let (mut config, config_path) =
        HostConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    cli.apply(&mut config);
    config.validate()?;

    init_logging(cli.verbose, config.log_file.as_deref());
    match &config_path {
        Some(path) => log::info!("Using config {:?}", path),
        None => log::info!("No config file found, using defaults"),
    }

    if cli.list_devices {
        for device in list_output_devices().map_err(|e| anyhow!(e))? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let (device, stream_config) = AudioEngine::negotiate(&config.audio).map_err(|e| anyhow!(e))?;
    let sample_rate = stream_config.sample_rate.0;
    let block_frames = config.audio.buffer_frames as usize;

    let params = Arc::new(ParameterChannel::new(config.params, sample_rate));
    let history = Arc::new(HistoryRing::for_duration(
        config.recording.seconds,
        sample_rate,
        block_frames,
    ));
    log::debug!("History ring: {:?}", history);

    let shadow = if config.module.shadow_copy {
        ShadowCopy::temp_dir()
    } else {
        ShadowCopy::Disabled
    };
    cleanup_scratch_dir(&shadow);

    let live = Arc::new(LiveModule::new());
    let host = Arc::new(ModuleHost::new(Arc::clone(&live), Arc::clone(&params), shadow));

    let build = config.module.build.as_ref().map(BuildStep::from);
    load_initial_module(&config, &host, build.as_ref()).await?;

    let engine = Arc::new(AudioCallbackEngine::new(live, Arc::clone(&history)));
    let stream = AudioEngine::start(&device, &stream_config, Arc::clone(&engine), block_frames)
        .map_err(|e| anyhow!(e))
        .context("Failed to start audio output")?;
    log::info!(
        "Audio running at {} Hz on {} channel(s)",
        stream.sample_rate(),
        stream.channels()
    );

    let coordinator = Arc::new(ReloadCoordinator::new(
        Arc::clone(&host),
        ReloadSettings {
            watch_path: config.module.source_path.clone(),
            binary_path: config.module.binary_path.clone(),
            build,
            poll_interval: config.module.poll_interval(),
        },
    ));
    let watcher = Arc::clone(&coordinator).watch();

    let encoder = Arc::new(SnapshotEncoder::new(
        history,
        sample_rate,
        config.recording.bit_depth,
    ));
    let surface = ControlSurface::new(
        Arc::clone(&host),
        engine,
        coordinator,
        encoder,
        config.recording.path.clone(),
    );

    println!("hotdsp running, type `help` for commands");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = surface.run(stdin, std::io::stdout()) => {
            result.context("Console failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted");
        }
    }

    log::info!("Shutting down");
    watcher.abort();
    // Stop the callback before the module goes away
    drop(stream);
    host.unload();
    Ok(())
}

/// Build (if configured) and load the module binary. Either failing stops
/// startup before the audio stream is opened.
async fn load_initial_module(
    config: &HostConfig,
    host: &ModuleHost,
    build: Option<&BuildStep>,
) -> Result<()> {
    if config.module.build_on_start {
        if let Some(build) = build {
            build.run().await.context("Initial module build failed")?;
        }
    }

    let path = &config.module.binary_path;
    host.load(path)
        .with_context(|| format!("Failed to load module {}", path.display()))?;
    Ok(())
}
