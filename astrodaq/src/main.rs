/*!
# AstroPix DAQ tool

Command-line front end for the AstroPix core: writes configuration files,
generates configuration bitstreams and replays recorded run logs into hit
tables.

## Usage

### Generate a configuration file
```bash
astrodaq config -o astrodaq.toml
```

### Configuration bitstream with one analog pixel and injection
```bash
astrodaq --config astrodaq.toml bitstream --analog 0,0 --inject --format hex
```

### Decode a run log
```bash
astrodaq decode run_20240501.log --csv hits.csv --max-errors 100
```
*/

use anyhow::{Context, Result};
use astropix::Asic;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod export;
mod output;
mod replay;
mod runlog;

use config::AppConfig;
use export::{BitstreamFormat, FileWriter};
use output::{CsvSink, JsonLinesSink, Outputs};
use replay::{ReplayOptions, RunReplay, StopReason};

#[derive(Parser)]
#[command(name = "astrodaq")]
#[command(about = "AstroPix configuration bitstreams and run log decoding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "astrodaq.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "astrodaq.toml")]
        output: PathBuf,
    },

    /// Print or save the configuration bitstream
    Bitstream {
        /// Digital mask file, one line of row bits per column
        #[arg(long)]
        mask: Option<PathBuf>,

        /// Enable the comparator of a pixel (repeatable)
        #[arg(long, value_name = "COL,ROW", value_parser = parse_pixel)]
        pixel: Vec<(usize, usize)>,

        /// Route a pixel to the analog output and enable its column injection
        #[arg(long, value_name = "COL,ROW", value_parser = parse_pixel)]
        analog: Option<(usize, usize)>,

        /// Enable injection for the selected pixels
        #[arg(long)]
        inject: bool,

        /// Output encoding
        #[arg(long, value_enum, default_value_t = BitstreamFormat::Bits)]
        format: BitstreamFormat,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode a recorded run log into hits
    Decode {
        /// Run log with one "<index>\t<hex>" line per readout
        runlog: PathBuf,

        /// Write hits to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print one JSON object per hit to stdout
        #[arg(long)]
        json: bool,

        /// Decode failures tolerated before stopping (overrides the config)
        #[arg(long)]
        max_errors: Option<u32>,

        /// Stop after this many readouts
        #[arg(long)]
        max_runs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr to keep stdout clean for bitstreams and JSON
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    match cli.command {
        Commands::Config { output } => generate_config_file(output),

        Commands::Bitstream { mask, pixel, analog, inject, format, output } => {
            let config = load_config(&cli.config)?;
            run_bitstream(&config, mask.as_deref(), &pixel, analog, inject, format, output.as_deref())
        }

        Commands::Decode { runlog, csv, json, max_errors, max_runs } => {
            let config = load_config(&cli.config)?;
            run_decode(&config, runlog, csv.as_deref(), json, max_errors, max_runs)
        }
    }
}

/// `COL,ROW` pixel address
fn parse_pixel(value: &str) -> std::result::Result<(usize, usize), String> {
    let (col, row) = value
        .split_once(',')
        .ok_or_else(|| format!("expected COL,ROW, got '{}'", value))?;
    let col = col.trim().parse().map_err(|e| format!("bad column '{}': {}", col, e))?;
    let row = row.trim().parse().map_err(|e| format!("bad row '{}': {}", row, e))?;
    Ok((col, row))
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        info!("Using config: {}", path.display());
        AppConfig::load_from_file(path)
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        Ok(AppConfig::new())
    }
}

fn run_bitstream(
    config: &AppConfig,
    mask: Option<&Path>,
    pixels: &[(usize, usize)],
    analog: Option<(usize, usize)>,
    inject: bool,
    format: BitstreamFormat,
    output: Option<&Path>,
) -> Result<()> {
    let threshold = config.threshold_volts()?;
    info!("Comparator threshold: {} mV ({:.3} V)", config.voltages.threshold_mv, threshold);

    let registers = config.build_register_map()?;
    let out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output file: {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let mut asic = Asic::new(registers, FileWriter::new(out, format)).with_chip_version(config.chip.version);

    if let Some(mask_path) = mask {
        let text = std::fs::read_to_string(mask_path)
            .with_context(|| format!("Failed to read mask file: {}", mask_path.display()))?;
        asic.apply_digital_mask(&text, inject, false)
            .with_context(|| format!("Invalid mask file: {}", mask_path.display()))?;
    }

    for &(col, row) in pixels {
        asic.enable_pixel(col, row, false)?;
        if inject {
            asic.enable_injection_column(col, false)?;
            asic.enable_injection_row(row, false)?;
        }
    }

    if let Some((col, row)) = analog {
        asic.configure_analog_pixel(col, row, inject, false)?;
    }

    debug!("Register configuration:\n{}", asic.registers());
    asic.update().context("Failed to write configuration bitstream")?;

    if let Some(path) = output {
        info!("{} vector(s) written to {}", asic.writer().written(), path.display());
    }
    Ok(())
}

fn run_decode(
    config: &AppConfig,
    runlog: PathBuf,
    csv: Option<&Path>,
    json: bool,
    max_errors: Option<u32>,
    max_runs: Option<u64>,
) -> Result<()> {
    let mut outputs = Outputs::new();
    if let Some(path) = csv {
        outputs.push(Box::new(CsvSink::create(path)?));
        info!("Writing hits to {}", path.display());
    }
    if json {
        outputs.push(Box::new(JsonLinesSink::new(io::stdout())));
    }
    if outputs.is_empty() {
        warn!("No output selected (--csv/--json), hits are only counted");
    }

    let options = ReplayOptions {
        max_errors: max_errors.unwrap_or(config.readout.max_decode_errors),
        max_runs,
        channel_buffer_size: config.readout.channel_buffer_size,
    };
    info!("Replaying {} (max decode errors: {})", runlog.display(), options.max_errors);

    let replay = RunReplay::new(runlog, config.hit_decoder(), options);

    // Set up Ctrl+C handler
    let running = replay.get_running_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping replay...");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let stats = replay.run(&mut outputs)?;
    match stats.stop_reason {
        StopReason::TooManyErrors => warn!("Run stopped after {} decode errors", stats.errors),
        StopReason::Interrupted => info!("Run interrupted"),
        StopReason::EndOfLog | StopReason::MaxRuns => info!("Run complete"),
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   astrodaq --config {} bitstream", output_path.display());

    Ok(())
}
