mod assemble;
mod config;
mod content_api;
mod media;
mod pipeline;
mod sheets;
mod store;
mod tabs;
mod text;
mod util;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "deciders", about = "Race quiz content pipeline: spreadsheet tabs in, race documents out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate every race document for a content group
    Update {
        /// Content group (newsroom) to update
        #[arg(short, long, default_value = "dev")]
        group: String,
        /// Sheet gateway base URL (or SHEET_GATEWAY env var)
        #[arg(long)]
        gateway: Option<String>,
        /// Read tab data from a local JSON snapshot instead of the gateway
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Output directory for race documents
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
    /// List the configured content groups
    Groups,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Update {
            group,
            gateway,
            snapshot,
            out,
        } => {
            let config = Config::for_group(&group, gateway, snapshot, out)?;
            pipeline::run(config).await
        }
        Commands::Groups => {
            for name in Config::group_names() {
                println!("{name}");
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
