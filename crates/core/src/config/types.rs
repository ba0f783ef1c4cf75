use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryPolicies;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub plan: PlanConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryPolicies,
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub finalizer: FinalizerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tierflow.db")
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_filter() -> String {
    "info,tower_http=debug".to_string()
}

/// Execution plan location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanConfig {
    /// Directory holding plan templates and per-client copies
    #[serde(default = "default_plan_root")]
    pub root: PathBuf,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            root: default_plan_root(),
        }
    }
}

fn default_plan_root() -> PathBuf {
    PathBuf::from("plans")
}

/// HTTP task endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvokerConfig {
    /// Endpoint receiving one POST per work item attempt
    pub url: String,
    /// Request timeout in seconds (default: 60)
    #[serde(default = "default_invoker_timeout")]
    pub timeout_secs: u32,
    /// Extra headers sent with every request (e.g. authorization)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_invoker_timeout() -> u32 {
    60
}

/// Final artifact output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinalizerConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub plan: PlanConfig,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryPolicies,
    pub invoker: SanitizedInvokerConfig,
    pub finalizer: FinalizerConfig,
}

/// Sanitized invoker config (header values hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedInvokerConfig {
    pub url: String,
    pub timeout_secs: u32,
    /// Names of configured headers, values omitted
    pub headers: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let mut headers: Vec<String> = config.invoker.headers.keys().cloned().collect();
        headers.sort();

        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            logging: config.logging.clone(),
            plan: config.plan.clone(),
            orchestrator: config.orchestrator.clone(),
            retry: config.retry.clone(),
            invoker: SanitizedInvokerConfig {
                url: config.invoker.url.clone(),
                timeout_secs: config.invoker.timeout_secs,
                headers,
            },
            finalizer: config.finalizer.clone(),
        }
    }
}
