//! Command line harness for the Livestream Schedule offline cache worker.
//!
//! Drives one worker against a real origin and an on-disk cache directory,
//! so the install, fetch and activate steps can be exercised by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Prefetch the manifest into the current bucket
//! sw-harness --state-dir ./sw-cache install
//!
//! # Fetch a page, network first with cache fallback
//! sw-harness --state-dir ./sw-cache fetch /static/css/style.css?v=2
//!
//! # Drop buckets from older versions
//! sw-harness --state-dir ./sw-cache activate
//!
//! # Show what is cached
//! sw-harness --state-dir ./sw-cache list --json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use schedkit_net::{HttpFetcher, Method, Request};
use schedkit_sw::{CacheDir, OfflineCacheWorker, ResponseSource, SharedCaches, WorkerConfig};
use tracing::{debug, info};

mod logging;

use logging::{init_logging, LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "sw-harness")]
#[command(about = "Exercise the Livestream Schedule offline cache worker", version)]
struct Cli {
    /// JSON worker configuration; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config's persist_dir
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long, global = true, conflicts_with = "state_dir")]
    memory: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prefetch every manifest URL into the current bucket
    Install,

    /// Delete buckets that do not belong to the current version
    Activate,

    /// Handle one request the way the worker would for a page
    Fetch {
        /// Absolute URL, or a path resolved against the origin
        url: String,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List cache buckets and their entries
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbosity(cli.verbose, cli.log_format));

    let mut config = load_config(cli.config.as_deref())?;
    if cli.memory {
        config.persist_dir = None;
    } else if let Some(dir) = cli.state_dir {
        config.persist_dir = Some(dir);
    }

    let caches = match &config.persist_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using persistent cache");
            SharedCaches::persistent(CacheDir::new(dir))
                .await
                .with_context(|| format!("opening cache directory {}", dir.display()))?
        }
        None => SharedCaches::in_memory(),
    };

    let fetcher = Arc::new(
        HttpFetcher::new(config.fetcher_config()).context("building HTTP client")?,
    );
    let worker = OfflineCacheWorker::from_config(&config, fetcher, caches.clone())?;
    debug!(worker = %worker.id(), cache = worker.cache_name(), "Worker ready");

    match cli.command {
        Commands::Install => {
            worker.install().await?;
            println!(
                "Installed {} entries into {}",
                worker.manifest().len(),
                worker.cache_name()
            );
        }

        Commands::Activate => {
            let evicted = worker.activate().await?;
            if evicted.is_empty() {
                println!("Nothing to evict");
            }
            for name in evicted {
                println!("Evicted {name}");
            }
        }

        Commands::Fetch {
            url,
            method,
            data,
            body,
        } => {
            let request = build_request(&config, &url, &method, data)?;
            let served = worker.handle_fetch(request).await?;
            worker.flush().await;

            let source = match served.source {
                ResponseSource::Network => "network",
                ResponseSource::Cache => "cache",
            };
            println!(
                "{} {} ({source}, {} bytes)",
                served.response.status,
                served.response.url,
                served.response.body.len()
            );
            if body {
                println!("{}", String::from_utf8_lossy(&served.response.body));
            }
        }

        Commands::List { json } => {
            let storage = caches.read().await;
            if json {
                let listing: serde_json::Map<String, serde_json::Value> = storage
                    .keys()
                    .into_iter()
                    .filter_map(|name| storage.get(name).map(|cache| (name, cache)))
                    .map(|(name, cache)| {
                        let keys = cache
                            .keys()
                            .iter()
                            .map(|key| serde_json::Value::String(key.to_string()))
                            .collect();
                        (name.to_string(), serde_json::Value::Array(keys))
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for name in storage.keys() {
                    let Some(cache) = storage.get(name) else {
                        continue;
                    };
                    println!("{name} ({} entries)", cache.len());
                    for key in cache.keys() {
                        println!("  {key}");
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

fn build_request(
    config: &WorkerConfig,
    target: &str,
    method: &str,
    data: Option<String>,
) -> Result<Request> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("invalid method {method:?}"))?;
    if method == Method::GET && data.is_some() {
        bail!("GET requests cannot carry a body");
    }

    let url = config
        .origin_url()?
        .join(target)
        .with_context(|| format!("invalid URL {target:?}"))?;

    let mut request = Request::new(method, url);
    if let Some(data) = data {
        request = request.body(data);
    }
    Ok(request)
}
