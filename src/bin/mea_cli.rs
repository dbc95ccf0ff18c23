use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mea_spikes::acquisition::{AcquisitionSource, SyntheticConfig, SyntheticSource, WavSource};
use mea_spikes::detection::{ChannelSummary, RejectionCounts, SpikeEvent};
use mea_spikes::engine::{MeaEngine, OfflineRunner, RunReport};
use mea_spikes::raster::RasterAggregator;
use mea_spikes::telemetry::{self, TelemetrySnapshot};
use mea_spikes::AppConfig;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "mea_cli",
    about = "Multichannel spike detection harness for synthetic and recorded MEA data"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect spikes in a seeded synthetic recording (offline, deterministic)
    Simulate {
        #[command(flatten)]
        synthetic: SyntheticArgs,
        /// JSON configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print one JSON line per spike instead of the summary report
        #[arg(long)]
        events: bool,
    },
    /// Detect spikes in a multichannel WAV recording (offline)
    Replay {
        #[arg(long)]
        wav: PathBuf,
        /// Volts represented by a normalized sample value of 1.0
        #[arg(long, default_value_t = 1.0)]
        volts_per_unit: f64,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        events: bool,
    },
    /// Run the threaded engine in real time on a synthetic source
    Run {
        #[command(flatten)]
        synthetic: SyntheticArgs,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print one JSON line per spike as the raster drains it
        #[arg(long)]
        events: bool,
    },
    /// Print the default configuration as JSON
    DumpConfig,
}

#[derive(clap::Args, Debug)]
struct SyntheticArgs {
    /// Channel count (defaults to the configuration's)
    #[arg(long)]
    channels: Option<usize>,
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Mean firing rate per channel
    #[arg(long, default_value_t = 5.0)]
    spike_rate: f64,
    /// Background noise RMS in microvolts
    #[arg(long, default_value_t = 5.0)]
    noise_uv: f64,
    /// Spike trough depth in microvolts
    #[arg(long, default_value_t = 60.0)]
    amplitude_uv: f64,
}

impl SyntheticArgs {
    fn source(&self, config: &AppConfig) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            num_channels: config.acquisition.num_channels,
            sampling_frequency_hz: config.acquisition.sampling_frequency_hz,
            duration_s: Some(self.seconds),
            noise_rms: self.noise_uv * 1e-6,
            spike_amplitude: self.amplitude_uv * 1e-6,
            spike_rate_hz: self.spike_rate,
            seed: self.seed,
            ..SyntheticConfig::default()
        })
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    mea_spikes::init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate {
            synthetic,
            config,
            events,
        } => run_simulate(&synthetic, config.as_deref(), events),
        Commands::Replay {
            wav,
            volts_per_unit,
            config,
            events,
        } => run_replay(&wav, volts_per_unit, config.as_deref(), events),
        Commands::Run {
            synthetic,
            config,
            events,
        } => run_engine(&synthetic, config.as_deref(), events),
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&AppConfig::default())?);
            Ok(ExitCode::from(0))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn run_simulate(synthetic: &SyntheticArgs, config: Option<&Path>, events: bool) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    if let Some(channels) = synthetic.channels {
        config.acquisition.num_channels = channels;
    }
    let mut source = synthetic.source(&config);
    let report = run_offline(config, &mut source, events)?;

    if !events {
        let ground_truth: usize = source.ground_truth().iter().map(Vec::len).sum();
        emit_report(&OfflinePayload {
            source: "synthetic",
            report: &report,
            ground_truth_spikes: Some(ground_truth),
        })?;
    }
    Ok(ExitCode::from(0))
}

fn run_replay(
    wav: &Path,
    volts_per_unit: f64,
    config: Option<&Path>,
    events: bool,
) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    let mut source = WavSource::open(wav, volts_per_unit)
        .with_context(|| format!("opening recording {}", wav.display()))?;
    config.acquisition.num_channels = source.channel_count();
    config.acquisition.sampling_frequency_hz = source.sampling_frequency_hz();

    let report = run_offline(config, &mut source, events)?;
    if !events {
        emit_report(&OfflinePayload {
            source: "wav",
            report: &report,
            ground_truth_spikes: None,
        })?;
    }
    Ok(ExitCode::from(0))
}

fn run_offline(
    config: AppConfig,
    source: &mut dyn AcquisitionSource,
    events: bool,
) -> Result<RunReport> {
    let mut runner = OfflineRunner::new(config).context("building offline runner")?;
    let mut write_error = None;
    let report = runner
        .run_with(source, |_| {}, |event: &SpikeEvent| {
            if events && write_error.is_none() {
                match serde_json::to_string(event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => write_error = Some(err),
                }
            }
        })
        .context("running detection")?;
    if let Some(err) = write_error {
        return Err(err.into());
    }
    Ok(report)
}

fn run_engine(synthetic: &SyntheticArgs, config: Option<&Path>, events: bool) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    if let Some(channels) = synthetic.channels {
        config.acquisition.num_channels = channels;
    }
    let source = synthetic.source(&config);
    let refresh = Duration::from_millis(config.raster.refresh_ms.max(1));
    let num_channels = config.acquisition.num_channels;
    let raster_config = config.raster.clone();

    let mut engine = MeaEngine::new(config).context("building engine")?;
    let receiver = engine
        .start(Box::new(source))
        .context("starting engine")?;
    let mut raster = RasterAggregator::new(receiver, num_channels, raster_config);

    let mut write_error = None;
    let mut emit = |event: &SpikeEvent| {
        if events && write_error.is_none() {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(err) => write_error = Some(err),
            }
        }
    };

    let started = Instant::now();
    let mut next_refresh = started + refresh;
    while engine.stats().running {
        thread::sleep(Duration::from_millis(20));
        if Instant::now() >= next_refresh {
            raster.refresh_with(started.elapsed().as_secs_f64(), &mut emit);
            next_refresh += refresh;
        }
    }

    let summary = engine.stop().context("stopping engine")?;
    let now_s = started.elapsed().as_secs_f64();
    while raster.refresh_with(now_s, &mut emit).drained > 0 {}
    drop(emit);
    if let Some(err) = write_error {
        return Err(err.into());
    }
    if events {
        return Ok(ExitCode::from(0));
    }

    emit_report(&EnginePayload {
        source: "synthetic",
        channels: num_channels,
        ticks: summary.producer.ticks,
        spike_count: raster.total_drained(),
        dropped_samples: summary.detection.dropped_samples,
        dropped_events: summary.detection.dropped_events,
        cycles: summary.detection.cycle,
        rejections: summary.detection.rejections,
        per_channel: &summary.per_channel,
        telemetry: telemetry::hub().snapshot(),
    })?;
    Ok(ExitCode::from(0))
}

fn emit_report<T: Serialize>(payload: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

#[derive(Serialize)]
struct OfflinePayload<'a> {
    source: &'static str,
    #[serde(flatten)]
    report: &'a RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    ground_truth_spikes: Option<usize>,
}

#[derive(Serialize)]
struct EnginePayload<'a> {
    source: &'static str,
    channels: usize,
    ticks: u64,
    spike_count: u64,
    dropped_samples: u64,
    dropped_events: u64,
    cycles: u64,
    rejections: RejectionCounts,
    per_channel: &'a [ChannelSummary],
    telemetry: TelemetrySnapshot,
}
