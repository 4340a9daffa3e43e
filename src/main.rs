use anyhow::Result;
use tracing_subscriber::EnvFilter;

use famsync::storage::Config;

mod cli;
use cli::{CliMode, USAGE, build_organizer, parse_cli_mode, run_agenda_mode, run_status_mode, today};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli_mode = match parse_cli_mode(std::env::args().skip(1), today()) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("{}", USAGE);
            return Ok(());
        }
    };

    match cli_mode {
        CliMode::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        CliMode::AgendaDate { date, backend } => {
            let organizer = build_organizer(backend)?;
            run_agenda_mode(&organizer, date).await
        }
        CliMode::Status { backend } => {
            let organizer = build_organizer(backend)?;
            run_status_mode(&organizer).await
        }
    }
}

fn setup_logging() {
    let log_dir = Config::config_dir();

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "famsync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    std::mem::forget(_guard);

    tracing::info!("famsync started");
}
