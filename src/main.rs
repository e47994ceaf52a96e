//! Nine Scrolls daemon.
//!
//! Serves a namespace tree over the wire protocol: a file-backed (or RAM)
//! store with history, mounted at `/` behind a kernel.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (file store, history on, port 9564)
//! nine-scrolls
//!
//! # Custom data directory and listen address
//! nine-scrolls --data-dir /var/lib/scrolls --listen 0.0.0.0:9564
//!
//! # Ephemeral in-memory namespace
//! nine-scrolls --memory
//! ```

use clap::Parser;
use nine_scrolls::{
    Config, FileNamespace, Kernel, MemoryNamespace, Namespace, Store, StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nine-scrolls")]
#[command(about = "Hierarchical scroll store daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address for the wire protocol
    #[arg(long, env = "NINE_SCROLLS_LISTEN")]
    listen: Option<String>,

    /// Data directory for scroll files
    #[arg(long, env = "NINE_SCROLLS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Serve from RAM instead of the filesystem
    #[arg(long)]
    memory: bool,

    /// Disable patch history
    #[arg(long)]
    no_history: bool,

    /// Patch ring size per key
    #[arg(long)]
    max_patches: Option<usize>,

    /// Anchor ring size per key
    #[arg(long)]
    max_anchors: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("nine_scrolls=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.memory {
        config.memory = true;
    }
    if args.no_history {
        config.history = false;
    }
    if let Some(n) = args.max_patches {
        config.max_patches = n;
    }
    if let Some(n) = args.max_anchors {
        config.max_anchors = n;
    }

    let backend: Arc<dyn Namespace> = if config.memory {
        info!("backing namespace: memory");
        Arc::new(MemoryNamespace::with_max_watchers(config.max_watchers))
    } else {
        info!(data_dir = %config.data_dir.display(), "backing namespace: file");
        Arc::new(FileNamespace::with_max_watchers(&config.data_dir, config.max_watchers))
    };

    let store = Store::new(
        backend,
        StoreConfig {
            history: config.history,
            max_patches: config.max_patches,
            max_anchors: config.max_anchors,
            ..Default::default()
        },
    )?;

    let kernel = Kernel::new();
    kernel.mount("/", Arc::new(store)).await?;
    let ns: Arc<dyn Namespace> = Arc::new(kernel);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, history = config.history, "nine-scrolls up");

    tokio::select! {
        result = nine_scrolls::wire::serve(listener, Arc::clone(&ns)) => {
            if let Err(e) = result {
                error!(error = %e, "server loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    ns.close().await?;
    info!("namespace closed, bye");
    Ok(())
}
