use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::cli::Cli;
use crate::pipeline::{PipelineSettings, RowPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug, Validate)]
pub struct Config {
    /// Address to bind the HTTP server to
    pub host: String,

    pub port: u16,

    /// Program that transforms an uploaded table
    /// Invoked as: <transform_command> <transform_args...> <input> <output>
    #[validate(length(min = 1, message = "TRANSFORM_COMMAND must not be empty"))]
    pub transform_command: String,

    pub transform_args: Vec<String>,

    /// Directory under which every job gets its own workspace
    pub work_dir: PathBuf,

    /// Maximum size of one uploaded file (in bytes)
    /// Default: 10MB (10 * 1024 * 1024)
    #[validate(range(min = 1, message = "MAX_UPLOAD_SIZE must be at least 1 byte"))]
    pub max_upload_size: usize,

    /// Deadline for one run of the transformation command
    #[validate(range(min = 1, max = 86400, message = "PROCESS_TIMEOUT_SECS must be between 1 and 86400"))]
    pub process_timeout_secs: u64,

    #[validate(range(min = 1, max = 1024, message = "MAX_CONCURRENT_JOBS must be between 1 and 1024"))]
    pub max_concurrent_jobs: usize,

    /// Bytes of stdout/stderr kept per process run
    #[validate(range(min = 1, message = "CAPTURE_LIMIT must be at least 1 byte"))]
    pub capture_limit: usize,

    pub csv_delimiter: u8,

    pub row_policy: RowPolicy,

    /// Value for Access-Control-Allow-Origin; header is omitted when unset
    pub cors_allow_origin: Option<String>,

    pub log_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// All variables are optional:
    /// - HOST (default: 127.0.0.1), PORT (default: 8002)
    /// - TRANSFORM_COMMAND (default: python3), TRANSFORM_ARGS (default: script.py)
    /// - WORK_DIR (default: <system temp>/table-transform)
    /// - MAX_UPLOAD_SIZE (default: 10485760 = 10MB)
    /// - PROCESS_TIMEOUT_SECS (default: 300)
    /// - MAX_CONCURRENT_JOBS (default: 4)
    /// - CAPTURE_LIMIT (default: 65536)
    /// - CSV_DELIMITER (default: ','), CSV_ROW_POLICY (default: reject)
    /// - CORS_ALLOW_ORIGIN (default: unset)
    /// - LOG_DIR (default: logs)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transform_args = lookup("TRANSFORM_ARGS")
            .unwrap_or_else(|| "script.py".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let work_dir = lookup("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("table-transform"));

        let csv_delimiter = match lookup("CSV_DELIMITER") {
            Some(raw) => parse_delimiter(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "CSV_DELIMITER",
                value: raw.clone(),
                reason: "expected a single ASCII character or 'tab'".to_string(),
            })?,
            None => b',',
        };

        let config = Config {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&lookup, "PORT", 8002)?,
            transform_command: lookup("TRANSFORM_COMMAND").unwrap_or_else(|| "python3".to_string()),
            transform_args,
            work_dir,
            max_upload_size: parse_var(&lookup, "MAX_UPLOAD_SIZE", 10 * 1024 * 1024)?, // Default: 10MB
            process_timeout_secs: parse_var(&lookup, "PROCESS_TIMEOUT_SECS", 300)?,
            max_concurrent_jobs: parse_var(&lookup, "MAX_CONCURRENT_JOBS", 4)?,
            capture_limit: parse_var(&lookup, "CAPTURE_LIMIT", 64 * 1024)?,
            csv_delimiter,
            row_policy: parse_var(&lookup, "CSV_ROW_POLICY", RowPolicy::Reject)?,
            cors_allow_origin: lookup("CORS_ALLOW_ORIGIN").filter(|v| !v.trim().is_empty()),
            log_dir: lookup("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, ConfigError> {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(work_dir) = &cli.work_dir {
            self.work_dir = work_dir.clone();
        }
        if let Some(command) = &cli.command {
            self.transform_command = command.clone();
        }
        if let Some(log_dir) = &cli.log_dir {
            self.log_dir = log_dir.clone();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            work_root: self.work_dir.clone(),
            command: self.transform_command.clone(),
            leading_args: self.transform_args.clone(),
            process_timeout: self.process_timeout(),
            max_upload_size: self.max_upload_size,
            max_concurrent_jobs: self.max_concurrent_jobs,
            capture_limit: self.capture_limit,
            delimiter: self.csv_delimiter,
            row_policy: self.row_policy,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_delimiter(raw: &str) -> Option<u8> {
    if raw.eq_ignore_ascii_case("tab") || raw == "\\t" {
        return Some(b'\t');
    }
    match raw.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'"' && *byte != b'\n' && *byte != b'\r' => Some(*byte),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8002);
        assert_eq!(config.transform_command, "python3");
        assert_eq!(config.transform_args, vec!["script.py".to_string()]);
        assert_eq!(config.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(config.process_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.csv_delimiter, b',');
        assert_eq!(config.row_policy, RowPolicy::Reject);
        assert!(config.cors_allow_origin.is_none());
        assert!(config.work_dir.ends_with("table-transform"));
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("PORT", "9000"),
            ("TRANSFORM_COMMAND", "/usr/bin/env"),
            ("TRANSFORM_ARGS", "python3  -u transform.py"),
            ("CSV_DELIMITER", "tab"),
            ("CSV_ROW_POLICY", "skip"),
            ("CORS_ALLOW_ORIGIN", "http://localhost:3000"),
            ("WORK_DIR", "/var/tmp/jobs"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.transform_args, ["python3", "-u", "transform.py"]);
        assert_eq!(config.csv_delimiter, b'\t');
        assert_eq!(config.row_policy, RowPolicy::Skip);
        assert_eq!(config.cors_allow_origin.as_deref(), Some("http://localhost:3000"));

        let settings = config.pipeline_settings();
        assert_eq!(settings.command, "/usr/bin/env");
        assert_eq!(settings.work_root, PathBuf::from("/var/tmp/jobs"));
    }

    #[test]
    fn empty_args_mean_no_leading_args() {
        let config = load(&[("TRANSFORM_ARGS", "")]).unwrap();
        assert!(config.transform_args.is_empty());
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = load(&[("MAX_UPLOAD_SIZE", "ten")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "MAX_UPLOAD_SIZE", .. }));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            load(&[("PROCESS_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load(&[("MAX_CONCURRENT_JOBS", "0")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load(&[("TRANSFORM_COMMAND", "")]),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_bad_delimiters() {
        for bad in [";;", "\"", "é", ""] {
            assert!(load(&[("CSV_DELIMITER", bad)]).is_err(), "accepted {bad:?}");
        }
        assert_eq!(load(&[("CSV_DELIMITER", ";")]).unwrap().csv_delimiter, b';');
    }

    #[test]
    fn cli_overrides_environment() {
        let cli = Cli::parse_from(["table-transform", "--port", "7000", "--command", "cat"]);
        let config = load(&[("PORT", "9000")]).unwrap().apply_cli(&cli).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.transform_command, "cat");
    }
}
