use anyhow::Context;
use atlas_core::broadcast::Broadcaster;
use atlas_core::config::{Settings, Tunables};
use atlas_core::domain::records::SweepKind;
use atlas_core::storage::PgStore;
use atlas_core::sweep::{run_sweep, Scheduler, SweepContext};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "atlas_worker")]
struct Args {
    /// Run one sweep (pulse, book, macro, meeting-prep) and exit. Without it, all four
    /// loops run on their cadences until Ctrl-C.
    #[arg(long)]
    sweep: Option<SweepKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(args, &settings).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "worker failed");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args, settings: &Settings) -> anyhow::Result<()> {
    let tunables = Tunables::from_env()?;
    let db_url = settings.require_database_url()?;
    let store = PgStore::connect(db_url, 5).await?;

    // No live listeners in this process; the API hosts the SSE channel.
    let broadcaster = Arc::new(Broadcaster::new(tunables.broadcast_buffer));
    broadcaster.start();

    let ctx = Arc::new(SweepContext::from_settings(
        settings,
        tunables,
        Arc::new(store),
        broadcaster,
    ));

    match args.sweep {
        Some(kind) => {
            let report = run_sweep(&ctx, kind)
                .await
                .with_context(|| format!("{} failed", kind.label()))?;
            tracing::info!(sweep = kind.slug(), summary = %report.summary, "one-shot sweep done");
        }
        None => {
            let scheduler = Scheduler::start(ctx);
            tracing::info!(sweeps = ?scheduler.kinds(), "scheduler running");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            tracing::info!("shutdown requested; waiting for in-flight sweeps");
            scheduler.shutdown().await;
        }
    }
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
