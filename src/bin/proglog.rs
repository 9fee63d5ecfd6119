use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use proglog::common::Error;
use proglog::storage::{Config, Record, Segment};

#[derive(Subcommand)]
enum CMD {
    /// Append values and print their offsets
    APPEND { values: Vec<String> },
    /// Print the value stored at an offset
    READ { offset: u64 },
    /// Print offsets, file sizes and whether the segment is full
    INFO,
    /// Delete the segment files
    REMOVE,
}

#[derive(Parser)]
#[command(version, about = "Inspect and append to a commit log segment", long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Config file (TOML); PROGLOG_SEGMENT__* env vars override it
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Log directory holding the segment files
    #[clap(short, long, default_value = "/var/lib/proglog")]
    dir: PathBuf,

    /// Base offset of the segment, defaults to segment.initial_offset
    #[clap(short, long)]
    base_offset: Option<u64>,

    /// Emit debug logs
    #[clap(short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: CMD,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let base_offset = args.base_offset.unwrap_or(config.segment.initial_offset);
    let mut segment = Segment::new(&args.dir, base_offset, config)
        .with_context(|| format!("Failed to open segment {} in {}", base_offset, args.dir.display()))?;

    match args.cmd {
        CMD::APPEND { values } => {
            for value in values {
                if segment.is_maxed() {
                    segment.close()?;
                    bail!("segment {} is full", base_offset);
                }
                match segment.append(&mut Record::new(value)) {
                    Ok(offset) => println!("{}", offset),
                    Err(Error::EndOfData) => {
                        segment.close()?;
                        bail!("segment {} is full", base_offset);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            segment.close()?;
        }
        CMD::READ { offset } => {
            let record = segment.read(offset)?;
            println!("{}", String::from_utf8_lossy(&record.value));
            segment.close()?;
        }
        CMD::INFO => {
            println!("base_offset={}", segment.base_offset());
            println!("next_offset={}", segment.next_offset());
            println!("store_bytes={}", segment.store_size());
            println!("index_bytes={}", segment.index_size());
            println!("maxed={}", segment.is_maxed());
            segment.close()?;
        }
        CMD::REMOVE => {
            segment.remove()?;
            info!("removed segment {} from {}", base_offset, args.dir.display());
        }
    }

    Ok(())
}
