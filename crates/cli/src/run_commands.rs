use std::time::Duration;

use {
    anyhow::{Result, bail},
    autopilot_scheduler::DueCheckReport,
    chrono::{DateTime, Utc},
    tokio::time::MissedTickBehavior,
    tracing::{info, warn},
};

use crate::context::{AppContext, print_json};

/// Retention cleanup runs at most this often inside `tick`.
const CLEANUP_EVERY: chrono::Duration = chrono::Duration::hours(24);

/// One due check; `force` treats every scheduled agent as due.
pub async fn run_due(ctx: &AppContext, force: bool) -> Result<()> {
    let now = ctx.scheduler.now();
    let report = if force {
        ctx.scheduler.force_run_all(now).await?
    } else {
        ctx.scheduler.run_due_check(now).await?
    };
    log_report(&report, force);
    print_json(&report)
}

fn log_report(report: &DueCheckReport, forced: bool) {
    if report.created.is_empty() && report.armed.is_empty() && report.skipped.is_empty() {
        return;
    }
    info!(
        forced,
        created = report.created.len(),
        armed = report.armed.len(),
        skipped = report.skipped.len(),
        "due check finished"
    );
    for skip in &report.skipped {
        warn!(agent_id = %skip.agent_id, reason = ?skip.reason, "agent skipped");
    }
}

/// Run due checks every `interval` until Ctrl+C, with daily retention cleanup.
pub async fn tick(ctx: &AppContext, interval: Option<u64>) -> Result<()> {
    if ctx.pinned_now {
        bail!("--now pins the clock and cannot be combined with tick");
    }
    let secs = interval.unwrap_or(ctx.config.scheduler.tick_interval_secs);
    if secs == 0 {
        bail!("tick interval must be at least one second");
    }

    let mut timer = tokio::time::interval(Duration::from_secs(secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs = secs, "scheduler ticking");
    let mut last_cleanup: Option<DateTime<Utc>> = None;
    loop {
        tokio::select! {
            _ = timer.tick() => {
                let now = ctx.scheduler.now();
                match ctx.scheduler.run_due_check(now).await {
                    Ok(report) => log_report(&report, false),
                    Err(e) => warn!(error = %e, "due check failed"),
                }
                if cleanup_due(last_cleanup, now) {
                    let days = ctx.config.scheduler.retention_days;
                    match ctx.scheduler.cleanup_old_tasks(days).await {
                        Ok(removed) => info!(removed, days, "retention cleanup finished"),
                        Err(e) => warn!(error = %e, "retention cleanup failed"),
                    }
                    last_cleanup = Some(now);
                }
            },
            _ = &mut shutdown => {
                info!("received Ctrl+C, shutting down");
                break;
            },
        }
    }
    Ok(())
}

fn cleanup_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last.is_none_or(|at| now - at >= CLEANUP_EVERY)
}

pub async fn stats(ctx: &AppContext) -> Result<()> {
    print_json(&ctx.scheduler.stats(ctx.scheduler.now()).await?)
}
