use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use usbprobe_core::fuzzer::{self, FuzzOutcome};
use usbprobe_core::sequence::SequenceOutcome;
use usbprobe_core::{
    Attempt, NusbTransport, ProbeConfig, ProbeSession, TracingObserver, WatchPlan, WritePlan,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Black-box USB register and bulk prober", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// Wait up to this many seconds for the device to appear
    #[arg(long, default_value_t = 0)]
    wait: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read every register and list the informative ones
    ReadScan {
        #[arg(long, value_delimiter = ',', value_parser = parse_byte)]
        registers: Vec<u8>,
    },
    /// Read longer values from selected registers
    DeepRead {
        #[arg(long, value_delimiter = ',', value_parser = parse_byte,
              default_values_t = [0x00u8, 0x63, 0x3C, 0xFC])]
        registers: Vec<u8>,
        #[arg(long, default_value_t = 8)]
        length: usize,
    },
    /// Write values to registers and watch status and bulk IN
    WriteScan {
        /// Registers to scan (default: all)
        #[arg(long, value_delimiter = ',', value_parser = parse_byte)]
        registers: Vec<u8>,
        /// Values to write (default: 0..=255)
        #[arg(long, value_delimiter = ',', value_parser = parse_word)]
        values: Vec<u16>,
        /// Registers to leave out
        #[arg(long, value_delimiter = ',', value_parser = parse_byte)]
        skip: Vec<u8>,
    },
    /// Run the activation sequences
    Sequences {
        /// Force the active state after each reset
        #[arg(long)]
        active_prelude: bool,
    },
    /// Fuzz bulk OUT with base commands and their checksum variants
    Fuzz {
        /// Extra base commands as hex, e.g. 55AA0100
        #[arg(long = "command", value_parser = parse_hex)]
        commands: Vec<HexBytes>,
        /// Skip the pre-framed candidates
        #[arg(long)]
        no_raw_frames: bool,
    },
    /// Poll registers and bulk IN for changes
    Watch {
        #[arg(long, value_delimiter = ',', value_parser = parse_byte,
              default_values_t = [0x63u8, 0x6A])]
        registers: Vec<u8>,
        #[arg(long, default_value_t = 200)]
        rounds: usize,
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
    },
    /// List the device's endpoints
    Endpoints,
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let value = parse_word(s)?;
    u8::try_from(value).map_err(|_| format!("{s} does not fit in a byte"))
}

fn parse_word(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s}: {e}"))
}

/// Bytes given on the command line as a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

fn parse_hex(s: &str) -> Result<HexBytes, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits)
        .map(HexBytes)
        .map_err(|e| format!("{s}: {e}"))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ProbeConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProbeConfig::default(),
    };

    if args.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    let Some(command) = args.command else {
        bail!("no command given, see --help");
    };

    info!("Starting usbprobe (nusb backend)...");
    let mut session = if args.wait > 0 {
        ProbeSession::wait_for_device(
            config,
            Arc::new(TracingObserver),
            Duration::from_secs(args.wait),
        )?
    } else {
        ProbeSession::open(config)?
    };

    match command {
        Command::ReadScan { registers } => {
            let registers = all_if_empty(registers);
            for reading in session.read_scan(&registers)? {
                println!("0x{:02X}: {:02X?}", reading.address, reading.data);
            }
        }
        Command::DeepRead { registers, length } => {
            for (address, attempt) in session.deep_read(&registers, length)? {
                match attempt {
                    Attempt::Done(data) => println!("0x{address:02X}: {data:02X?}"),
                    Attempt::Failed(failure) => println!("0x{address:02X}: {failure}"),
                }
            }
        }
        Command::WriteScan {
            registers,
            values,
            skip,
        } => {
            let mut plan = WritePlan::targeted(&all_if_empty(registers)).skipping(&skip);
            if !values.is_empty() {
                plan = plan.with_values(&values);
            }
            info!(writes = plan.len(), "Starting write scan");
            let report = session.write_scan(&plan)?;
            for finding in &report.findings {
                println!("{finding}");
            }
            match report.hit {
                Some(trial) => println!("BULK DATA after {}", trial.stimulus),
                None => println!("No bulk data after {} writes", report.attempts),
            }
        }
        Command::Sequences { active_prelude } => {
            let sequences = session.sequences();
            match session.run_sequences(&sequences, active_prelude)? {
                SequenceOutcome::Hit {
                    sequence,
                    step,
                    trial,
                } => println!(
                    "BULK DATA: sequence {} ({}) step {}: {}",
                    sequence, sequences[sequence], step, trial.stimulus
                ),
                SequenceOutcome::Exhausted { findings } => {
                    for finding in &findings {
                        println!("{finding}");
                    }
                    println!("No sequence produced bulk data");
                }
            }
        }
        Command::Fuzz {
            commands,
            no_raw_frames,
        } => {
            let mut bases = session.commands();
            bases.extend(commands.into_iter().map(|HexBytes(bytes)| bytes));
            let frames = if no_raw_frames {
                Vec::new()
            } else {
                fuzzer::raw_frames()
            };
            match session.fuzz(&bases, &frames)? {
                FuzzOutcome::Hit { trial, .. } => {
                    println!("Reaction to {}: {:?}", trial.stimulus, trial.result)
                }
                FuzzOutcome::Exhausted { attempts, .. } => {
                    println!("No reaction after {attempts} frames")
                }
            }
        }
        Command::Watch {
            registers,
            rounds,
            interval_ms,
        } => {
            let plan = WatchPlan {
                registers,
                rounds,
                interval: Duration::from_millis(interval_ms),
                ..WatchPlan::default()
            };
            let report = session.watch(&plan)?;
            println!(
                "{} register changes, {} bulk reads in {} rounds",
                report.changes.len(),
                report.bulk.len(),
                report.rounds
            );
        }
        Command::Endpoints => print_endpoints(session.transport()),
    }

    session.finish();
    Ok(())
}

fn all_if_empty(registers: Vec<u8>) -> Vec<u8> {
    if registers.is_empty() {
        (0..=u8::MAX).collect()
    } else {
        registers
    }
}

fn print_endpoints(transport: &NusbTransport) {
    for ep in transport.endpoints() {
        println!(
            "interface {} alt {}: 0x{:02X} {} max packet {}",
            ep.interface, ep.alt_setting, ep.address, ep.transfer_type, ep.max_packet_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_byte("0x36"), Ok(0x36));
        assert_eq!(parse_byte("87"), Ok(87));
        assert!(parse_byte("0x100").is_err());
        assert_eq!(parse_word("0x0100"), Ok(0x100));
    }

    #[test]
    fn test_parse_hex_command() {
        assert_eq!(parse_hex("55AA0100"), Ok(HexBytes(vec![0x55, 0xAA, 0x01, 0x00])));
        assert_eq!(parse_hex("55 aa"), Ok(HexBytes(vec![0x55, 0xAA])));
        assert!(parse_hex("55A").is_err());
        assert!(parse_hex("aé1").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_cli_parses_write_scan() {
        let args = Args::try_parse_from([
            "usbprobe",
            "write-scan",
            "--registers",
            "0x01,0x0C,0x24",
            "--skip",
            "0x36",
        ])
        .unwrap();
        match args.command {
            Some(Command::WriteScan {
                registers, skip, ..
            }) => {
                assert_eq!(registers, vec![0x01, 0x0C, 0x24]);
                assert_eq!(skip, vec![0x36]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
