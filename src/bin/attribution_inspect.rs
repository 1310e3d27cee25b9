//! Attribution Inspect - diagnostics over an attribution database
//!
//! Usage:
//!   attribution_inspect sources [LIMIT]
//!   attribution_inspect reports [LIMIT]
//!   attribution_inspect next-report-time
//!   attribution_inspect clear-all
//!
//! Environment variables:
//!   ATTRIBUTION_DB_PATH - SQLite database path (default: attribution.db)
//!   ATTRIBUTION_*       - engine limits, see `AttributionConfig::from_env`
//!   RUST_LOG            - log filter (default: info)

use attribution_storage::{AttributionConfig, AttributionStorageSql, DefaultStorageDelegate};
use chrono::{DateTime, Utc};
use log::{error, info};
use std::env;
use std::process::ExitCode;

const DEFAULT_DB_PATH: &str = "attribution.db";

enum Command {
    Sources(Option<usize>),
    Reports(Option<usize>),
    NextReportTime,
    ClearAll,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let limit = |arg: Option<&String>| -> Result<Option<usize>, String> {
        arg.map(|raw| raw.parse::<usize>().map_err(|_| format!("invalid limit '{}'", raw)))
            .transpose()
    };

    match args.first().map(String::as_str) {
        Some("sources") => Ok(Command::Sources(limit(args.get(1))?)),
        Some("reports") => Ok(Command::Reports(limit(args.get(1))?)),
        Some("next-report-time") => Ok(Command::NextReportTime),
        Some("clear-all") => Ok(Command::ClearAll),
        Some(other) => Err(format!("unknown command '{}'", other)),
        None => Err("missing command".to_string()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: attribution_inspect <sources [LIMIT] | reports [LIMIT] | next-report-time | clear-all>");
            return ExitCode::from(2);
        }
    };

    let config = AttributionConfig::from_env();
    if let Err(e) = config.validate() {
        error!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    let db_path = env::var("ATTRIBUTION_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    info!("📂 Database: {}", db_path);

    let mut storage = AttributionStorageSql::new(&db_path, Box::new(DefaultStorageDelegate::new(config)));

    let printed = match command {
        Command::Sources(limit) => print_json(&storage.get_active_sources(limit)),
        Command::Reports(limit) => print_json(&storage.get_attribution_reports(DateTime::<Utc>::MAX_UTC, limit)),
        Command::NextReportTime => print_json(&storage.get_next_report_time(Utc::now())),
        Command::ClearAll => {
            storage.clear_data(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC, None);
            Ok(())
        }
    };

    if let Err(e) = printed {
        error!("❌ Failed to write output: {}", e);
        return ExitCode::FAILURE;
    }
    if storage.is_closed() {
        error!("❌ Database could not be opened: {}", db_path);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
