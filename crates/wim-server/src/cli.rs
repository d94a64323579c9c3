use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "wim-server", version, about = "Web inventory reconciliation jobs")]
pub struct Cli {
    /// Configuration file (defaults to config/wim.toml when present).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh every due asset from the probe source and re-derive status.
    Reconcile {
        /// Only assets never scanned or last scanned before this date.
        #[arg(long, value_parser = parse_cli_date)]
        since: Option<DateTime<Utc>>,
    },
    /// Delete expired certificates that no FQDN references.
    CleanCertificates {
        /// Expiration cutoff (default: now).
        #[arg(long, value_parser = parse_cli_date)]
        cutoff: Option<DateTime<Utc>>,
        /// Report candidates without deleting them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Create domains and FQDNs from a JSON seed file.
    InitDomains { seed: PathBuf },
    /// Print recent reconciliation run reports.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run both jobs on their configured intervals until interrupted.
    Daemon,
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_cli_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{value}' is neither an RFC 3339 timestamp nor YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_plain_dates_as_utc_midnight() {
        assert_eq!(
            parse_cli_date("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        assert_eq!(
            parse_cli_date("2024-03-01T10:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_cli_date("yesterday").is_err());
        assert!(parse_cli_date("2024-13-01").is_err());
    }

    #[test]
    fn clean_certificates_flags() {
        let cli = Cli::try_parse_from([
            "wim-server",
            "clean-certificates",
            "--cutoff",
            "2024-01-01",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::CleanCertificates { cutoff, dry_run } => {
                assert!(dry_run);
                assert_eq!(cutoff, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn reconcile_without_since() {
        let cli = Cli::try_parse_from(["wim-server", "-c", "custom.toml", "reconcile"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Reconcile { since: None }));
    }
}
