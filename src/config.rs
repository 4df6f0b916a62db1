//! Command line and environment configuration of the worker binary.
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "sheet-ingest", version, about = "Ingests uploaded spreadsheets into the spreadsheet store")]
pub struct WorkerConfig {
    /// SQLite database holding the `spreadsheets` table
    #[arg(long, env = "SHEET_INGEST_DATABASE", default_value = "spreadsheets.db")]
    pub database: PathBuf,

    /// Maximum number of jobs processed at once
    #[arg(long, env = "SHEET_INGEST_CONCURRENCY", default_value = "1")]
    pub concurrency: NonZeroUsize,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, env = "SHEET_INGEST_LOG", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        WorkerConfig::command().debug_assert();
    }

    #[test]
    fn explicit_arguments() {
        let config = WorkerConfig::try_parse_from([
            "sheet-ingest",
            "--database",
            "/tmp/sheets.db",
            "--concurrency",
            "4",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/sheets.db"));
        assert_eq!(config.concurrency.get(), 4);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(WorkerConfig::try_parse_from(["sheet-ingest", "--concurrency", "0"]).is_err());
    }
}
