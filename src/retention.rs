//! Background task for enforcing artifact and session retention

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{TimeDelta, Utc};

use crate::config::RetentionConfig;
use crate::conversation::SessionStore;
use crate::voice::AudioStore;

/// What one retention pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub audio_files: usize,
    pub sessions: usize,
}

/// Run a single retention pass
///
/// Failures are logged; a pass never aborts the caller.
pub async fn sweep_once(
    audio: &AudioStore,
    sessions: &SessionStore,
    config: &RetentionConfig,
) -> SweepReport {
    let audio_files = match audio
        .purge_older_than(config.audio_max_age, SystemTime::now())
        .await
    {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error = %e, "failed to purge audio artifacts");
            0
        }
    };

    let idle = TimeDelta::from_std(config.session_idle_timeout).unwrap_or(TimeDelta::MAX);
    let sessions = sessions.sweep(idle, Utc::now()).await;

    let report = SweepReport {
        audio_files,
        sessions,
    };
    if report == SweepReport::default() {
        tracing::debug!("nothing to clean up");
    } else {
        tracing::info!(
            audio_files = report.audio_files,
            sessions = report.sessions,
            "retention pass removed expired items"
        );
    }
    report
}

/// Starts a background task that periodically deletes expired audio and
/// drops ended or idle call sessions.
///
/// This task runs indefinitely.
pub async fn start_retention_task(
    audio: AudioStore,
    sessions: Arc<SessionStore>,
    config: RetentionConfig,
) {
    tracing::info!(
        interval_secs = config.sweep_interval.as_secs(),
        audio_max_age_secs = config.audio_max_age.as_secs(),
        session_idle_secs = config.session_idle_timeout.as_secs(),
        "starting retention task"
    );

    let mut ticker = tokio::time::interval(config.sweep_interval);
    // The first tick completes immediately; let startup settle first.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        sweep_once(&audio, &sessions, &config).await;
    }
}
