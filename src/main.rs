use std::{io::Write, path::PathBuf};

use chzzk_rec::{
    api::ChzzkClient,
    config::{self, Config},
    recorder::Recorder,
};
use clap::Parser;
use log::{error, LevelFilter};

/// Records Chzzk live streams as soon as they start.
#[derive(Parser, Debug)]
#[command(name = "chzzk-rec", version, about)]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long, env = "CHZZK_REC_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log level, overrides `logging.level` (DEBUG, INFO, WARNING, ERROR)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logger(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("chzzk_rec", level)
        .parse_default_env()
        .format(|buf, record| {
            let level = buf.default_styled_level(record.level());
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level,
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            init_logger(LevelFilter::Info);
            error!("Could not load {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    let level = match &args.log_level {
        Some(level) => config::parse_level(level),
        None => config.logging.level_filter(),
    };
    init_logger(level);

    let client = match ChzzkClient::new(&config.cookies) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not create HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let mut recorder = Recorder::new(config, client);
    if let Err(e) = recorder.run().await {
        error!("Exiting after fatal error: {}", e);
        std::process::exit(1);
    }
}
