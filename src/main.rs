use anyhow::Result;
use callkeeper::app::{self, AppStateBuilder};
use callkeeper::config::{Cli, Config};
use clap::Parser;
use std::fs::File;
use tokio::select;
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenv::dotenv();

    let mut config = cli
        .conf
        .filter(|conf| std::path::Path::new(conf).exists())
        .map(|conf| Config::load(&conf).expect("Failed to load config"))
        .unwrap_or_default();
    config.apply_env();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let mut _appender_guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).expect("Failed to create log file");
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _appender_guard = Some(guard);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    let state = AppStateBuilder::new()
        .config(config)
        .build()
        .expect("Failed to build app state");

    info!("Starting callkeeper on {}", state.config.http_addr);
    select! {
        r = app::run(state.clone()) => {
            r?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            state.token.cancel();
        }
    }
    Ok(())
}
