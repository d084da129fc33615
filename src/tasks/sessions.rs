//! Idle-session reaper. Learners close laptops without ending sessions; the
//! reaper flushes and evicts anything that went quiet so no progress is lost
//! to an abandoned tab.

use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tokio::time::interval;

use crate::core::state::AppState;
use crate::services::playback;

const REAP_INTERVAL_SECONDS: u64 = 60;

pub(crate) async fn run_reaper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(tokio::time::Duration::from_secs(REAP_INTERVAL_SECONDS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                reap_idle_sessions(&state).await;
            }
        }
    }
}

async fn reap_idle_sessions(state: &AppState) {
    let idle_after =
        Duration::seconds(state.settings().sync().session_idle_timeout_seconds as i64);
    let now = OffsetDateTime::now_utc();

    for session in state.sessions().snapshot().await {
        let mut guard = session.lock().await;
        if now - guard.last_seen_at() < idle_after {
            continue;
        }

        let user_id = guard.user_id().to_string();
        let course_id = guard.course_id().to_string();

        if guard.is_dirty() {
            playback::flush(state, &mut guard).await;
        }
        playback::checkpoint(state, &mut guard).await;
        drop(guard);

        state.sessions().remove(&user_id, &course_id).await;
        tracing::info!(user_id, course_id, "Reaped idle learning session");
    }
}

/// Final flush of every live session, used on graceful shutdown.
pub(crate) async fn drain_all(state: &AppState) {
    for session in state.sessions().snapshot().await {
        let mut guard = session.lock().await;
        if guard.is_dirty() {
            playback::flush(state, &mut guard).await;
        }
        playback::checkpoint(state, &mut guard).await;
    }
}
