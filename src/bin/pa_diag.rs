use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use paudio_core::audio::oscillator::SineOscillator;
use paudio_core::engine::backend::AudioBackend;
use paudio_core::engine::SimulatedBackend;
use paudio_core::{
    CallbackInfo, CallbackResult, Device, Direction, EngineConfig, Session, StreamConfig, Topology,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pa-diag error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pa-diag", about = "Audio device topology and stream diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::List(args) => list_command(args),
            Command::Tone(args) => tone_command(args, false),
            Command::Simulate(args) => tone_command(args, true),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every host API and device the backend reports.
    List(ListArgs),
    /// Play a sine tone on the native backend.
    Tone(ToneArgs),
    /// Play a sine tone on the simulated backend.
    Simulate(ToneArgs),
}

#[derive(Args, Debug, Clone)]
struct ListArgs {
    /// Dump the topology as JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
    /// List the simulated desktop instead of the native backend.
    #[arg(long, default_value_t = false)]
    simulated: bool,
}

#[derive(Args, Debug, Clone)]
struct ToneArgs {
    /// How long to play (seconds).
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,
    /// Tone frequency (Hz).
    #[arg(long, default_value_t = 440.0)]
    freq: f64,
    /// Output device, as a global index or a name. Defaults to the default output.
    #[arg(long)]
    device: Option<String>,
    /// Tone amplitude.
    #[arg(long, default_value_t = 0.2)]
    amplitude: f32,
}

#[cfg(feature = "cpal-backend")]
fn native_backend() -> Result<Arc<dyn AudioBackend>> {
    Ok(Arc::new(paudio_core::engine::CpalBackend::new()))
}

#[cfg(not(feature = "cpal-backend"))]
fn native_backend() -> Result<Arc<dyn AudioBackend>> {
    bail!("built without the cpal-backend feature; use the simulated backend")
}

fn open_session(simulated: bool) -> Result<Session> {
    let backend = if simulated {
        Arc::new(SimulatedBackend::desktop()) as Arc<dyn AudioBackend>
    } else {
        native_backend()?
    };
    Session::with_config(0, backend, EngineConfig::load()).context("failed to open audio session")
}

fn list_command(args: ListArgs) -> Result<()> {
    let session = open_session(args.simulated)?;
    let topology = session.topology()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(topology.as_ref())?);
        return Ok(());
    }

    println!("{}", session.version_text());
    for api in topology.apis() {
        let marker = if topology.default_host_api().map(|d| d.index) == Some(api.index) {
            "*"
        } else {
            " "
        };
        println!("{marker}[{}] {} ({} devices)", api.index, api.name, api.devices.len());
        for device in topology.all_devices(api.index) {
            let mut tags = Vec::new();
            if api.default_input.map(|r| r.global_index) == Some(device.index) {
                tags.push("default in");
            }
            if api.default_output.map(|r| r.global_index) == Some(device.index) {
                tags.push("default out");
            }
            println!(
                "    {:>3}  {:<48} in {:>2}  out {:>2}  {:>6.0} Hz  {}",
                device.index,
                device.name,
                device.max_input_channels,
                device.max_output_channels,
                device.default_sample_rate,
                tags.join(", ")
            );
        }
    }
    Ok(())
}

fn pick_output<'a>(topology: &'a Topology, selector: Option<&str>) -> Result<&'a Device> {
    let device = match selector {
        None => topology.default_device(Direction::Output)?,
        Some(text) => match text.parse::<usize>() {
            Ok(index) => topology
                .find_device(index)
                .ok_or_else(|| anyhow!("no device with index {index}"))?,
            Err(_) => topology
                .find_device_by_name(text)
                .ok_or_else(|| anyhow!("no device named {text:?}"))?,
        },
    };
    if device.max_output_channels == 0 {
        bail!("device {} ({}) has no outputs", device.index, device.name);
    }
    Ok(device)
}

fn tone_duration(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("--seconds must be a positive, finite number, got {seconds}"))
}

fn tone_command(args: ToneArgs, simulated: bool) -> Result<()> {
    let duration = tone_duration(args.seconds)?;
    let session = open_session(simulated)?;
    let topology = session.topology()?;
    let device = pick_output(&topology, args.device.as_deref())?;

    let mut config = StreamConfig::for_device_direction(device, Direction::Output)?;
    let channels = config.output_channels();

    let mut oscillator = SineOscillator::new(config.sample_rate, args.freq);
    let amplitude = args.amplitude;
    let mut engine = session.open_stream(&mut config, move |info: CallbackInfo<'_>| {
        oscillator.fill_interleaved(info.output, info.output_channels, amplitude);
        CallbackResult::Continue
    })?;

    println!(
        "playing {:.1} Hz on [{}] {} ({} ch, {} Hz, {} frames)",
        args.freq, device.index, device.name, channels, config.sample_rate, config.frames_per_buffer
    );
    engine.start()?;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(250));
        println!(
            "  {:>6.2} s  level {:.3}",
            engine.elapsed_seconds(),
            engine.envelope(0).unwrap_or(0.0)
        );
    }

    engine.stop()?;
    engine.close();
    Ok(())
}
