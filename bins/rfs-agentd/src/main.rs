use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rfs_agent::{wait_for_shutdown_signal, AgentConfig, Executor, LocalFileOps};
use rfs_config::{Config, ConfigManager};
use rfs_logging::LogHandle;
use rfs_net::Receiver;
use rfs_net_tcp::TcpListener;

/// rfs agent: executes file operations sent by cache clients.
#[derive(Parser, Debug)]
#[command(name = "rfs-agentd", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,

    /// Override the listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the served root directory
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", AgentConfig::default().to_toml_string()?);
        return Ok(());
    }

    let manager = ConfigManager::<AgentConfig>::load_or_default(args.config.as_deref())
        .context("loading agent config")?;
    if args.listen.is_some() || args.root.is_some() {
        let mut config = (*manager.get()).clone();
        if let Some(listen) = args.listen {
            config.listen = listen;
        }
        if let Some(root) = args.root {
            config.root = root;
        }
        manager.update(config).context("applying command line overrides")?;
    }
    let config = manager.get();

    let log = rfs_logging::init_logging(&config.log)?;
    tracing::info!(listen = %config.listen, root = %config.root.display(), "starting rfs agent");

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    let executor = Executor::new(Receiver::bind(listener), LocalFileOps::new(&config.root));
    let handle = executor.handle();
    let mut serving = tokio::spawn(executor.run());

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
            handle.stop();
        }
        _ = reload_on_hangup(&manager, &log) => {}
        // The executor only ends by itself if the transport fails.
        stats = &mut serving => {
            let stats = stats??;
            tracing::warn!(?stats, "executor exited on its own");
            return Ok(());
        }
    }

    let stats = serving.await??;
    tracing::info!(?stats, "rfs agent shut down");
    Ok(())
}

/// Re-read the config file on every SIGHUP and apply the new log level.
/// Never returns.
#[cfg(unix)]
async fn reload_on_hangup(manager: &ConfigManager<AgentConfig>, log: &LogHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable");
            return std::future::pending().await;
        }
    };
    while hangup.recv().await.is_some() {
        if let Err(e) = manager.reload() {
            tracing::warn!(error = %e, "config reload failed");
            continue;
        }
        if let Err(e) = log.reload(&manager.get().log) {
            tracing::warn!(error = %e, "log level not applied");
        }
    }
    std::future::pending().await
}

#[cfg(not(unix))]
async fn reload_on_hangup(_manager: &ConfigManager<AgentConfig>, _log: &LogHandle) {
    std::future::pending().await
}
