//! §6 Configuration (environment) — the process-level settings every run
//! mode reads at startup.

use std::env;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum ExecutionMode {
    Triggered,
    Poll,
    Scan,
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("required environment variable {name} is not set"))]
    MissingVar { name: &'static str },
    #[snafu(display("environment variable {name} has an invalid value {value:?}: {source}"))]
    InvalidVar {
        name: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("EXECUTION_MODE={value:?} is not one of triggered, poll, scan"))]
    InvalidExecutionMode { value: String },
    #[snafu(display("poll mode requires SQS_QUEUE_URL"))]
    MissingQueueUrl,
    #[snafu(display("scan mode requires SOURCE_BUCKET"))]
    MissingSourceBucket,
}

/// Process-wide configuration, read once at startup (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub execution_mode: ExecutionMode,
    pub tenant_config_table: String,
    pub source_bucket: Option<String>,
    pub sqs_queue_url: Option<String>,
    pub central_log_distribution_role_arn: String,
    pub max_batch_size: usize,
    pub retry_attempts: u32,
    pub scan_interval: Duration,
    pub aws_region: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_s3_use_path_style: bool,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).ok().context(MissingVarSnafu { name })
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok()
}

fn optional_parsed<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().context(InvalidVarSnafu { name, value }),
        Err(_) => Ok(default),
    }
}

fn bool_env(name: &'static str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let execution_mode = match required("EXECUTION_MODE")?.as_str() {
            "triggered" => ExecutionMode::Triggered,
            "poll" => ExecutionMode::Poll,
            "scan" => ExecutionMode::Scan,
            other => {
                return InvalidExecutionModeSnafu {
                    value: other.to_owned(),
                }
                .fail()
            }
        };

        let source_bucket = optional("SOURCE_BUCKET");
        let sqs_queue_url = optional("SQS_QUEUE_URL");

        if execution_mode == ExecutionMode::Scan && source_bucket.is_none() {
            return MissingSourceBucketSnafu.fail();
        }
        if execution_mode == ExecutionMode::Poll && sqs_queue_url.is_none() {
            return MissingQueueUrlSnafu.fail();
        }

        let scan_interval_secs: u64 = optional_parsed("SCAN_INTERVAL", 10)?;

        Ok(Self {
            execution_mode,
            tenant_config_table: required("TENANT_CONFIG_TABLE")?,
            source_bucket,
            sqs_queue_url,
            central_log_distribution_role_arn: required("CENTRAL_LOG_DISTRIBUTION_ROLE_ARN")?,
            max_batch_size: optional_parsed("MAX_BATCH_SIZE", 1000usize)?,
            retry_attempts: optional_parsed("RETRY_ATTEMPTS", 3u32)?,
            scan_interval: Duration::from_secs(scan_interval_secs),
            aws_region: optional("AWS_REGION"),
            aws_endpoint_url: optional("AWS_ENDPOINT_URL"),
            aws_s3_use_path_style: bool_env("AWS_S3_USE_PATH_STYLE", false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for name in [
            "EXECUTION_MODE",
            "TENANT_CONFIG_TABLE",
            "SOURCE_BUCKET",
            "SQS_QUEUE_URL",
            "CENTRAL_LOG_DISTRIBUTION_ROLE_ARN",
            "MAX_BATCH_SIZE",
            "RETRY_ATTEMPTS",
            "SCAN_INTERVAL",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn poll_mode_requires_queue_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("EXECUTION_MODE", "poll");
        env::set_var("TENANT_CONFIG_TABLE", "t");
        env::set_var("CENTRAL_LOG_DISTRIBUTION_ROLE_ARN", "arn:aws:iam::1:role/x");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingQueueUrl));
        clear_all();
    }

    #[test]
    fn defaults_applied_for_optional_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("EXECUTION_MODE", "triggered");
        env::set_var("TENANT_CONFIG_TABLE", "t");
        env::set_var("CENTRAL_LOG_DISTRIBUTION_ROLE_ARN", "arn:aws:iam::1:role/x");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.max_batch_size, 1000);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.scan_interval, Duration::from_secs(10));
        clear_all();
    }
}
