//! Process entry point: config, logging, schema migrations, and the
//! supervised background tasks (upload worker, GC coordinator, vacation
//! ledger cleanup) that keep running for the lifetime of the process
//! (spec.md §6, SPEC_FULL.md §4.15). Protocol front-ends (IMAP/POP3/LMTP/
//! ManageSieve wire framing) are out of scope; this binary only exposes
//! the construction points they would need — the pool, the engine, and
//! the object-store/cache/spool clients.

mod adapters;
mod config;
mod supervisor;

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use adapters::cache::BoundedCache;
use adapters::object_store::S3ObjectStore;
use adapters::spool::FsSpool;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mailbox state engine daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[clap(short, long, env = "MAILGRAM_CONFIG", default_value = "mailgram.toml")]
    config_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "mailgram=info,mailgram_engine=info,mailgram_user=info,mailgram_store=info");
    }

    // A panic anywhere (including a supervised background task) leaves the
    // process in an unknown state; crash the whole thing rather than limp
    // on with half the workers dead.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{panic_info}");
        eprintln!("{}", std::backtrace::Backtrace::force_capture());
        std::process::abort();
    }));

    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = config::read_config(&args.config_file)?;

    tokio::fs::create_dir_all(&config.spool_directory).await?;

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.relational_store_dsn).await?;
    sqlx::migrate!("../mailgram-store/migrations").run(&pool).await?;
    tracing::info!("schema migrations up to date");

    let object_store = Arc::new(S3ObjectStore::connect(&config.object_store).await?);
    let cache = Arc::new(BoundedCache::new(config.cache.size_limit_bytes));
    let spool = Arc::new(FsSpool::new(config.spool_directory.clone()));

    for listener in &config.listeners {
        match adapters::tls::build_acceptor(listener)? {
            Some(_) => tracing::info!(protocol = %listener.protocol, bind_addr = %listener.bind_addr, "TLS acceptor ready"),
            None => tracing::info!(protocol = %listener.protocol, bind_addr = %listener.bind_addr, "listener configured without TLS"),
        }
    }

    let shutdown = CancellationToken::new();
    let tasks = supervisor::spawn_background_tasks(pool.clone(), object_store, cache, spool, &config, shutdown.clone());

    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown signal received, stopping background tasks");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    pool.close().await;
    tracing::info!("clean shutdown");
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
