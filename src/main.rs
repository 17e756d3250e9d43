//! Hearingtest - adaptive hearing self-tests
//!
//! Runs one test session in the terminal. Answers are read line by line from
//! stdin and the session record is printed to stdout as JSON.

use anyhow::{Context, Result};
use hearingtest::audio::assets::WavDigitLibrary;
use hearingtest::session::{ChannelResponses, InputEvent, JsonSink};
use hearingtest::{
    procedure_for, EarMode, HearingTestError, PlaybackBackend, Sequencer, SessionConfig, TestKind,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Parsed command line
#[derive(Debug, Default)]
struct Options {
    test: Option<TestKind>,
    ear: Option<EarMode>,
    config_path: Option<PathBuf>,
    digits_dir: Option<PathBuf>,
    seed: Option<u64>,
    device: Option<String>,
    init_config: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the session record
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hearingtest=info".parse()?)
                .add_directive("hearingtest_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices()?;
                return Ok(());
            }
            "--version" | "-v" => {
                println!("hearingtest {}", hearingtest::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--init-config" => {
                options.init_config = true;
            }
            flag @ ("--test" | "-t" | "--ear" | "-e" | "--config" | "-c" | "--digits"
            | "--seed" | "--device" | "-d") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {flag} requires a value");
                    return Ok(());
                };
                match flag {
                    "--test" | "-t" => {
                        options.test = Some(value.parse().map_err(anyhow::Error::msg)?);
                    }
                    "--ear" | "-e" => {
                        options.ear = Some(value.parse().map_err(anyhow::Error::msg)?);
                    }
                    "--config" | "-c" => options.config_path = Some(PathBuf::from(value)),
                    "--digits" => options.digits_dir = Some(PathBuf::from(value)),
                    "--seed" => {
                        options.seed = Some(
                            value
                                .parse()
                                .with_context(|| format!("Invalid seed: {value}"))?,
                        );
                    }
                    _ => options.device = Some(value.clone()),
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let config_path = options.config_path.clone().unwrap_or_else(default_config_path);
    let mut config = SessionConfig::load(&config_path);
    if let Some(ear) = options.ear {
        config.ear_mode = ear;
    }

    if options.init_config {
        config.save(&config_path)?;
        println!("Config written to {}", config_path.display());
        return Ok(());
    }

    let Some(test) = options.test else {
        eprintln!("Error: --test is required");
        print_help();
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_session(test, config, options));
    // The stdin reader may still be blocked on a read
    runtime.shutdown_background();
    result
}

fn print_help() {
    println!("Usage: hearingtest --test <dbhl|din|freq|gap> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -t, --test KIND     Test to run: dbhl, din, freq or gap");
    println!("  -e, --ear MODE      Ear to test: left, right or both (default: config)");
    println!("  -c, --config PATH   Session config file (default: data dir)");
    println!("      --digits DIR    Directory with 000.wav .. 999.wav and noise.wav");
    println!("      --seed N        Seed for triplets, interval order and noise");
    println!("  -d, --device NAME   Output device (requires the `device` feature)");
    println!("      --init-config   Write the effective config to the config path");
    println!("  -l, --list          List output devices");
    println!("  -v, --version       Show version");
    println!("  -h, --help          Show this help");
    println!();
    println!("Answers, one per line:");
    println!("  y / n      heard the tone (dbhl)");
    println!("  123        the three digits you heard (din)");
    println!("  + / - / x  step up, step down, tone inaudible (freq)");
    println!("  1 / 2      interval containing the gap (gap)");
    println!("  r          replay the last stimulus");
    println!("  q          quit; the result covers the trials answered so far");
}

fn default_config_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearingtest")
        .join("config.json")
}

#[cfg(feature = "device")]
fn list_devices() -> Result<()> {
    println!("Scanning for output devices...");
    println!();

    match hearingtest::AudioEngine::list_devices() {
        Ok(devices) if devices.is_empty() => println!("No output devices found."),
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}. {}{}", i + 1, device.name, default_marker);
                println!("     Channels: {} out", device.output_channels);
                if !device.sample_rates.is_empty() {
                    println!("     Sample rates: {:?}", device.sample_rates);
                }
                println!();
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
    Ok(())
}

#[cfg(not(feature = "device"))]
fn list_devices() -> Result<()> {
    println!("Built without the `device` feature; sessions run on a silent virtual clock.");
    Ok(())
}

async fn run_session(test: TestKind, config: SessionConfig, options: Options) -> Result<()> {
    #[cfg(feature = "device")]
    {
        let mut engine = hearingtest::AudioEngine::new(config.sample_rate);
        if let Some(name) = &options.device {
            engine = engine.with_device(name.clone());
        }
        run_with_backend(engine, test, config, options).await
    }

    #[cfg(not(feature = "device"))]
    {
        if options.device.is_some() {
            anyhow::bail!("--device needs a build with the `device` feature");
        }
        let backend = hearingtest::OfflineBackend::new(config.sample_rate);
        run_with_backend(backend, test, config, options).await
    }
}

async fn run_with_backend<B: PlaybackBackend>(
    backend: B,
    test: TestKind,
    config: SessionConfig,
    options: Options,
) -> Result<()> {
    let mut procedure = procedure_for(test, &config)?;

    let (tx, responses) = ChannelResponses::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(event) = InputEvent::parse_line(&line) {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut sequencer = Sequencer::new(backend, responses, config);
    if let Some(seed) = options.seed {
        sequencer = sequencer.with_seed(seed);
    }
    if let Some(dir) = &options.digits_dir {
        sequencer = sequencer.with_digits(Box::new(WavDigitLibrary::open(dir)?));
    }

    let token = sequencer.cancellation_token();
    ctrlc::set_handler(move || token.cancel()).ok();

    info!(test = %test, ear = %sequencer.config().ear_mode, "Starting session. Press Ctrl+C to stop.");

    let mut sink = JsonSink::pretty(std::io::stdout());
    match sequencer.run(procedure.as_mut(), &mut sink).await {
        Ok(record) => {
            eprintln!("Result: {}", record.estimate);
            Ok(())
        }
        Err(HearingTestError::Cancelled) => {
            eprintln!("Session cancelled.");
            Ok(())
        }
        Err(e) => {
            error!("Session failed: {}", e);
            Err(e.into())
        }
    }
}
