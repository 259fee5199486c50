//! Gc command - delete expired sessions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use simplesess_session::{CollectionReport, GarbageCollector, GcEvent, GcScheduler};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::Context;

/// Arguments for the gc command.
#[derive(Args, Debug)]
pub struct GcArgs {
    /// Report expired sessions without deleting them
    #[arg(long)]
    pub dry_run: bool,

    /// Keep running and collect on a schedule until interrupted
    #[arg(long)]
    pub watch: bool,

    /// Seconds between collections in watch mode (default: [gc] interval_secs)
    #[arg(long, value_name = "SECS", requires = "watch")]
    pub interval: Option<u64>,
}

/// Run the gc command.
pub async fn run(args: GcArgs, ctx: &Context) -> Result<()> {
    let settings = ctx.config().gc();
    let store = ctx.open_store()?;
    let dry_run = args.dry_run || settings.dry_run;
    let collector = Arc::new(GarbageCollector::new(store).with_dry_run(dry_run));

    if args.watch {
        let interval = args
            .interval
            .map(Duration::from_secs)
            .unwrap_or_else(|| settings.interval());
        return watch(collector, interval, ctx).await;
    }

    let report = {
        let collector = Arc::clone(&collector);
        tokio::task::spawn_blocking(move || collector.collect_expired()).await??
    };
    print_report(&report, ctx)
}

/// Collect on a schedule until Ctrl-C, printing each run.
async fn watch(collector: Arc<GarbageCollector>, interval: Duration, ctx: &Context) -> Result<()> {
    let mut events = collector.subscribe();
    let scheduler = GcScheduler::new(collector, interval);
    if !ctx.json_output {
        println!(
            "{}",
            style(format!(
                "Collecting every {}s, press Ctrl-C to stop",
                scheduler.interval().as_secs()
            ))
            .dim()
        );
    }
    let (handle, cancel) = scheduler.spawn();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping scheduler");
                cancel.cancel();
                break;
            }
            event = events.recv() => match event {
                Ok(GcEvent::Completed(report)) => print_report(&report, ctx)?,
                Ok(GcEvent::Failed(e)) => {
                    if ctx.json_output {
                        println!("{}", serde_json::json!({ "error": e }));
                    } else {
                        eprintln!("{} {}", Style::new().red().apply_to("✗ Collection failed:"), e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed collection reports");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.await?;
    Ok(())
}

fn print_report(report: &CollectionReport, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let green = Style::new().green();

    let verb = if report.dry_run {
        "would expire"
    } else {
        "expired"
    };
    println!(
        "{} {} of {} session(s) {}, {} record(s) deleted",
        green.apply_to("✓"),
        report.sessions_expired,
        report.markers_scanned,
        verb,
        report.records_deleted,
    );

    if ctx.verbose || report.dry_run {
        for s in &report.expired {
            let when = s
                .expired_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unreadable".to_string());
            println!("  {:<16} {}  {}", s.namespace, s.id, dim.apply_to(when));
        }
    }

    Ok(())
}
