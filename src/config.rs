//! Command-line flags and environment configuration
//!
//! Every option has a default; only malformed values stop the process.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default delay between `/action/terminate` and the exit signal
pub const DEFAULT_TERMINATE_DELAY_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failure probability must be between 0 and 1, got {0}")]
    ProbabilityOutOfRange(f64),

    #[error("Invalid listen address: {0:?}")]
    InvalidAddress(String),
}

/// Raw command line, with environment fallbacks
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kad",
    about = "Kubernetes app demo: probes, graceful shutdown, chaos and cluster introspection"
)]
pub struct Args {
    /// Client listener address (":5000" style accepted)
    #[arg(long, env = "LISTEN_PORT", default_value = ":5000")]
    pub listen: String,

    /// Admin listener address
    #[arg(long, env = "LISTEN_ADMIN_PORT", default_value = ":5001")]
    pub listen_admin: String,

    /// Redis server used as the shared hit counter
    #[arg(long, env = "REDIS_SERVER")]
    pub redis_server: Option<String>,

    #[arg(long, env = "CLUSTER")]
    pub cluster: Option<String>,

    #[arg(long, env = "VES_IO_SITENAME")]
    pub site: Option<String>,

    #[arg(long, env = "VES_IO_REGION")]
    pub region: Option<String>,

    /// Failure probability for user requests (applies only on /)
    #[arg(long, env = "FAILURE_PROBABILITY", default_value_t = 0.0)]
    pub failure_probability: f64,

    /// Delay in seconds before exiting once the exit signal arrives
    #[arg(long, env = "EXIT_DELAY", default_value_t = 5)]
    pub exit_delay: u64,

    /// Delay in seconds between terminate and the exit signal
    #[arg(long, env = "TERMINATE_DELAY", default_value_t = DEFAULT_TERMINATE_DELAY_SECS)]
    pub terminate_delay: u64,

    /// Namespace whose resources are listed and deleted
    #[arg(long, env = "NAMESPACE", default_value = "kad")]
    pub namespace: String,

    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Timeout in seconds for each Kubernetes operation
    #[arg(long, env = "KUBE_TIMEOUT", default_value_t = 10)]
    pub kube_timeout: u64,

    /// Directory listed as persisted files
    #[arg(long, env = "DATADIR", default_value = "/data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "CONFIG_FILE", default_value = "/etc/kad/config.yml")]
    pub config_file: PathBuf,

    /// Sentinel file; while it exists the instance reports not ready
    #[arg(long, env = "READY_FILE", default_value = "/tmp/notready")]
    pub ready_file: PathBuf,

    /// Background color for main page
    #[arg(long, env = "COLOR")]
    pub color: Option<String>,

    /// Fail with non-zero exit code before starting
    #[arg(long)]
    pub fail: bool,

    /// URL receiving the exfiltration demo payload every minute
    #[arg(long)]
    pub malware_url: Option<String>,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub listen_admin: String,
    pub redis_server: Option<String>,
    pub cluster: Option<String>,
    pub site: Option<String>,
    pub region: Option<String>,
    pub failure_probability: f64,
    pub exit_delay: Duration,
    pub terminate_delay: Duration,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub kube_timeout: Duration,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub ready_file: PathBuf,
    pub color: String,
    pub fail: bool,
    pub malware_url: Option<String>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let p = args.failure_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::ProbabilityOutOfRange(p));
        }

        Ok(Self {
            listen: normalize_listen_address(&args.listen)?,
            listen_admin: normalize_listen_address(&args.listen_admin)?,
            redis_server: non_empty(args.redis_server),
            cluster: non_empty(args.cluster),
            site: non_empty(args.site),
            region: non_empty(args.region),
            failure_probability: p,
            exit_delay: Duration::from_secs(args.exit_delay),
            terminate_delay: Duration::from_secs(args.terminate_delay),
            namespace: args.namespace,
            kubeconfig: args.kubeconfig.filter(|p| !p.as_os_str().is_empty()),
            kube_timeout: Duration::from_secs(args.kube_timeout),
            data_dir: args.data_dir,
            config_file: args.config_file,
            ready_file: args.ready_file,
            color: non_empty(args.color).unwrap_or_else(|| "#ffffff".to_string()),
            fail: args.fail,
            malware_url: non_empty(args.malware_url),
        })
    }

    /// Hostname decorated with cluster, site and region, innermost first
    pub fn decorate_hostname(&self, hostname: &str) -> String {
        [&self.cluster, &self.site, &self.region]
            .into_iter()
            .flatten()
            .fold(hostname.to_string(), |acc, prefix| format!("{}/{}", prefix, acc))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            listen_admin: "0.0.0.0:5001".to_string(),
            redis_server: None,
            cluster: None,
            site: None,
            region: None,
            failure_probability: 0.0,
            exit_delay: Duration::from_secs(5),
            terminate_delay: Duration::from_secs(DEFAULT_TERMINATE_DELAY_SECS),
            namespace: "kad".to_string(),
            kubeconfig: None,
            kube_timeout: Duration::from_secs(10),
            data_dir: PathBuf::from("/data"),
            config_file: PathBuf::from("/etc/kad/config.yml"),
            ready_file: PathBuf::from("/tmp/notready"),
            color: "#ffffff".to_string(),
            fail: false,
            malware_url: None,
        }
    }
}

/// Accept Go-style ":5000" as well as "host:port"
pub fn normalize_listen_address(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    match normalized.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(normalized),
        _ => Err(ConfigError::InvalidAddress(addr.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
