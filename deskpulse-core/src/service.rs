//! Background service
//!
//! Wires capture and sync together. Raw events arrive on an mpsc channel and
//! are recorded by an ingestion task; the sync loop runs on its own schedule so
//! a slow collector never holds up event capture.
//!
//! The sync loop wakes on:
//! - the regular interval (`sync.interval_secs`)
//! - an on-demand request (return from idle, or a backlog follow-up)
//!
//! When the event stream ends or shutdown is signalled, the open session is
//! closed, buffered sessions get a last write attempt and a final sync runs.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::collector::{AccountSync, CollectorApi, SyncEngine, SyncStats, TickOutcome};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::tracker::SessionRecorder;
use crate::types::RawEvent;

/// Summary of a service run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    /// Raw events received
    pub events: usize,
    /// Sessions written to the log
    pub sessions_saved: usize,
    /// Sessions that could not be written before exit
    pub sessions_unsaved: usize,
    /// Upload statistics
    pub sync: SyncStats,
}

#[derive(Debug, Default)]
struct IngestSummary {
    events: usize,
    saved: usize,
    unsaved: usize,
}

/// Run capture and sync until the event stream ends or `shutdown` turns true.
pub async fn run<A: CollectorApi>(
    db: Arc<Database>,
    api: A,
    config: &Config,
    events: mpsc::Receiver<RawEvent>,
    shutdown: watch::Receiver<bool>,
) -> Result<ServiceSummary> {
    config.validate()?;

    let trigger = Arc::new(Notify::new());
    let recorder = SessionRecorder::new(db.clone()).with_sync_trigger(trigger.clone());
    let mut ingest = tokio::spawn(ingest_loop(
        recorder,
        events,
        shutdown.clone(),
        config.sync.interval(),
    ));

    let engine = SyncEngine::new(api, db.clone(), config.api.service.clone(), &config.sync);
    let account = AccountSync::new(db);

    let mut ticker = tokio::time::interval(config.sync.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut shutdown = shutdown;
    let mut watching = true;
    let mut follow_up = false;

    tracing::info!(
        interval_secs = config.sync.interval_secs,
        max_batch = engine.max_batch(),
        "Service started"
    );

    let ingest_result = loop {
        tokio::select! {
            result = &mut ingest => break result,
            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        tracing::info!("Shutdown requested");
                    }
                    Ok(()) => continue,
                    Err(_) => {
                        // Nobody can signal shutdown any more; run until the stream ends
                        watching = false;
                        continue;
                    }
                }
                // The ingestion task sees the same signal and closes the open session
                break (&mut ingest).await;
            }
            _ = ticker.tick() => {
                follow_up = sync_round(&engine, &account).await;
            }
            _ = trigger.notified() => {
                follow_up = sync_round(&engine, &account).await;
            }
            _ = std::future::ready(()), if follow_up => {
                follow_up = sync_round(&engine, &account).await;
            }
        }
    };

    let ingest_summary = match ingest_result {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Ingestion task failed");
            IngestSummary::default()
        }
    };

    // Final sync: drain whatever the last session added, follow-ups included
    loop {
        let report = engine.tick().await;
        if !report.follow_up {
            break;
        }
    }

    let summary = ServiceSummary {
        events: ingest_summary.events,
        sessions_saved: ingest_summary.saved,
        sessions_unsaved: ingest_summary.unsaved,
        sync: engine.stats(),
    };
    tracing::info!(
        events = summary.events,
        saved = summary.sessions_saved,
        unsaved = summary.sessions_unsaved,
        batches = summary.sync.batches_sent,
        "Service stopped"
    );
    Ok(summary)
}

/// One sync wake: upload, then refresh account state once no follow-up is due.
///
/// Returns whether another tick should run right away.
async fn sync_round<A: CollectorApi>(engine: &SyncEngine<A>, account: &AccountSync) -> bool {
    let report = engine.tick().await;
    if report.follow_up {
        return true;
    }
    if report.outcome != TickOutcome::NotConfigured {
        account.refresh(engine.api()).await;
    }
    false
}

async fn ingest_loop(
    mut recorder: SessionRecorder,
    mut events: mpsc::Receiver<RawEvent>,
    mut shutdown: watch::Receiver<bool>,
    retry_every: std::time::Duration,
) -> IngestSummary {
    let mut summary = IngestSummary::default();
    let mut last_observed: Option<i64> = None;
    let mut retry = tokio::time::interval(retry_every);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching = true;

    let stop_at = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    summary.events += 1;
                    last_observed = Some(event.observed_at);
                    summary.saved += recorder.observe(&event).persisted;
                }
                None => {
                    tracing::debug!("Event stream ended");
                    break last_observed;
                }
            },
            _ = retry.tick(), if recorder.pending_len() > 0 => {
                summary.saved += recorder.flush_pending();
            }
            changed = shutdown.changed(), if watching => match changed {
                Ok(()) if *shutdown.borrow() => break Some(Utc::now().timestamp_millis()),
                Ok(()) => {}
                Err(_) => watching = false,
            },
        }
    };

    if let Some(at) = stop_at {
        summary.saved += recorder.stop(at).persisted;
    }
    summary.saved += recorder.flush_pending();
    summary.unsaved = recorder.pending_len();
    if summary.unsaved > 0 {
        tracing::error!(
            unsaved = summary.unsaved,
            "Exiting with sessions that could not be written"
        );
    }
    summary
}
