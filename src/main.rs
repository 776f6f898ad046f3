use clap::Parser;
use kad::config::{Args, Config};
use kad::lifecycle;
use kad::server::admin::spawn_exfil_poster;
use kad::state::{Collaborators, HostInfo, ProcessState};
use tracing::{info, warn};

/// Validate flags and honor `--fail`
///
/// `--fail` refuses to start so the pod lands in CrashLoopBackOff.
pub fn load_config(args: Args) -> anyhow::Result<Config> {
    let config = Config::from_args(args)?;
    if config.fail {
        anyhow::bail!("Failing on start as requested by --fail");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config(Args::parse())?;
    info!(
        listen = %config.listen,
        listen_admin = %config.listen_admin,
        namespace = %config.namespace,
        failure_probability = config.failure_probability,
        "Starting kad"
    );

    let host = HostInfo::capture(&config);
    let collaborators = Collaborators::from_config(&config)?;
    let (state, exit) = ProcessState::new(config, host, collaborators)?;

    if let Some(url) = state.config.malware_url.clone() {
        warn!(url = %url, "Posting secrets to remote URL");
        spawn_exfil_poster(state.clone(), url);
    }

    lifecycle::run(state, exit).await?;
    info!("Exiting");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
