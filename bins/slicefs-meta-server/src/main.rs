use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use slicefs_kv_backends::MemDbEngine;
use slicefs_meta::{BackgroundRunner, Message, Meta, MetaConfig, MetaEngine, CHUNK_DEL, COMPACT_CHUNK};

/// slicefs metadata engine over an in-memory store
#[derive(Parser, Debug)]
#[command(name = "slicefs-meta-server", version, about)]
struct Args {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received CTRL+C"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&MetaConfig::default())?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => MetaConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MetaConfig::default(),
    };
    let _log_guard = slicefs_logging::init_logging(&config.log)?;
    tracing::info!(config = ?args.config, readonly = config.readonly, "starting slicefs meta server");

    let meta = MetaEngine::new(config, Arc::new(MemDbEngine::new()));
    meta.on_msg(
        CHUNK_DEL,
        Box::new(|msg| {
            if let Message::DeleteSlice { chunkid, clen } = msg {
                tracing::info!(chunkid, clen, "content object released");
            }
            Ok(())
        }),
    )?;
    meta.on_msg(
        COMPACT_CHUNK,
        Box::new(|msg| {
            if let Message::CompactChunk { inode, indx } = msg {
                tracing::info!(inode, indx, "chunk ready for compaction");
            }
            Ok(())
        }),
    )?;
    meta.init().await?;

    let mut runner = BackgroundRunner::new();
    meta.spawn_background(&mut runner);
    tracing::info!(tasks = runner.len(), "meta server ready");

    wait_for_shutdown_signal().await?;
    tracing::info!("meta server shutting down");
    runner.shutdown().await;
    Ok(())
}
