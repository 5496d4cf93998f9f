use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use netwarden::config::Config;
use netwarden::Warden;

#[derive(Parser)]
#[command(name = "netwarden")]
#[command(author, version, about = "Live network intrusion detection pipeline")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the detection pipeline and API server
    Run {
        /// Replay a pcap file instead of capturing live
        #[arg(long)]
        pcap_file: Option<String>,
    },

    /// Import the legacy CSV log into the database, then exit
    ImportCsv,

    /// Fetch the OSINT blocklists once and report counts, then exit
    UpdateFeeds,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = Config::load_or_default(&config_path);

    match cli.command {
        Commands::Run { pcap_file } => {
            let warden = Warden::new(config)?;
            warden.run(pcap_file).await
        }
        Commands::ImportCsv => {
            let warden = Warden::new(config)?;
            let inserted = warden.import_csv()?;
            println!("Imported {} rows from legacy CSV", inserted);
            Ok(())
        }
        Commands::UpdateFeeds => {
            let warden = Warden::new(config)?;
            warden.update_feeds().await?;
            let snapshot = warden.indicators().load();
            println!(
                "Indicators loaded: {} IPs, {} domains",
                snapshot.ips.len(),
                snapshot.domains.len()
            );
            Ok(())
        }
    }
}
