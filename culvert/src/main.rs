use std::io::{self, BufRead};

use anyhow::Result;
use clap::Parser;
use culvert_core::{Lifecycle, ServerContext};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::config::Config;

mod config;
mod factory;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file
    #[clap(short, long, value_parser)]
    config: String,

    /// Print the assembled container tree as JSON and exit
    #[clap(long)]
    dump_tree: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let context = ServerContext::new(factory::builtin_registry()?);
    let service = factory::build_service(&config, &context)?;

    if args.dump_tree {
        println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
        return Ok(());
    }

    service.start()?;
    for connector in service.find_connectors() {
        info!(
            connector = %connector.name(),
            addr = ?connector.local_addr(),
            "listening"
        );
    }
    info!("type `stop` or close stdin to shut down");

    // Block until asked to stop.
    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) if line.trim() == "stop" => break,
            Ok(line) if line.trim() == "status" => {
                println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("stdin closed: {e}");
                break;
            }
        }
    }

    info!(service = %service.name(), "shutting down");
    service.stop()?;
    service.destroy()?;
    Ok(())
}
