use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rfs_cache::{CacheStats, ClientConfig, ClientContext, DiskCacheManager};
use rfs_config::{Config, ConfigManager};
use rfs_net_tcp::{TcpConnector, TcpSocket};
use rfs_proto::OpenFlags;
use rfs_types::RemotePath;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

/// rfs client: run file operations against agents through a local cache.
///
/// Remote paths are written `host:port@/path`.
#[derive(Parser, Debug)]
#[command(name = "rfs-ctl", version, about)]
struct Cli {
    /// Client configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Print cache statistics as JSON when done
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a remote file
    Cat { path: RemotePath },
    /// Pull remote files into the cache
    Fetch {
        #[arg(required = true)]
        paths: Vec<RemotePath>,
    },
    /// Create an empty file in a remote directory
    Touch { dir: RemotePath, name: String },
    /// Remove a remote file or empty directory
    Rm { path: RemotePath },
    /// Rename a remote file on the same agent
    Mv { path: RemotePath, new_path: String },
    /// Set the size of a remote file
    Truncate { path: RemotePath, size: u64 },
    /// Print the default client configuration
    DumpDefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    if let Command::DumpDefaultConfig = cli.command {
        print!("{}", ClientConfig::default().to_toml_string()?);
        return Ok(());
    }

    let manager = ConfigManager::<ClientConfig>::load_or_default(cli.config.as_deref())
        .context("loading client config")?;
    if let Some(root) = cli.cache_root {
        let mut config = (*manager.get()).clone();
        config.cache.cache_root = root;
        manager.update(config).context("applying command line overrides")?;
    }

    let ctx: ClientContext<TcpSocket> =
        ClientContext::with_config_manager(manager, Arc::new(TcpConnector::new()))
            .await
            .context("starting client")?;
    let result = run(ctx.cache(), cli.command).await;
    let stats = ctx.cache().stats();
    ctx.shutdown().await;
    result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        tracing::debug!(?stats, "cache stats");
    }
    Ok(())
}

async fn run(cache: &DiskCacheManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Cat { path } => {
            let fd = cache.open(&path, OpenFlags::read_only()).await?;
            let mut stdout = tokio::io::stdout();
            let mut offset = 0u64;
            let copied: anyhow::Result<()> = loop {
                let chunk = match cache.read(fd, offset, 64 << 10).await {
                    Ok(chunk) => chunk,
                    Err(e) => break Err(e.into()),
                };
                if chunk.is_empty() {
                    break stdout.flush().await.map_err(anyhow::Error::from);
                }
                if let Err(e) = stdout.write_all(&chunk).await {
                    break Err(e.into());
                }
                offset += chunk.len() as u64;
            };
            cache.close(&path, fd).await?;
            copied
        }
        Command::Fetch { paths } => {
            for path in &paths {
                cache.fetch(path).await.with_context(|| format!("fetching {path}"))?;
            }
            print_stats(cache.stats());
            Ok(())
        }
        Command::Touch { dir, name } => {
            let fd = cache.create(&dir, &name).await?;
            cache.close(&dir.join(&name), fd).await?;
            Ok(())
        }
        Command::Rm { path } => Ok(cache.remove(&path).await?),
        Command::Mv { path, new_path } => Ok(cache.rename(&path, &new_path).await?),
        Command::Truncate { path, size } => Ok(cache.truncate(&path, size).await?),
        Command::DumpDefaultConfig => Ok(()),
    }
}

fn print_stats(stats: CacheStats) {
    println!(
        "entries={} cached_bytes={} capacity_bytes={}",
        stats.entries, stats.cached_bytes, stats.capacity_bytes
    );
}
