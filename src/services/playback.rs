//! Learning sessions: the per-(learner, course) object that owns playback
//! mirror state, the capture scheduler, and the sync cadence. One instance
//! per active session, serialized behind a mutex (single-flight for ticks
//! and capture settlement), destroyed on session end.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Course, VideoRef};
use crate::db::types::SectionKind;
use crate::repositories;
use crate::services::proctoring::{CaptureRequest, CaptureScheduler, PlaybackTick};

/// Mirror and seed survive page reloads; a week of inactivity lets them
/// lapse together with the course session.
const MIRROR_TTL_SECONDS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncPolicy {
    pub(crate) checkpoint_every: Duration,
    pub(crate) flush_every: Duration,
}

impl SyncPolicy {
    pub(crate) fn from_settings(settings: &crate::core::config::SyncSettings) -> Self {
        Self {
            checkpoint_every: Duration::seconds(settings.checkpoint_interval_seconds as i64),
            flush_every: Duration::seconds(settings.flush_interval_seconds as i64),
        }
    }
}

/// Boundary events force an immediate authoritative write regardless of the
/// flush interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BoundaryKind {
    Pause,
    VideoEnd,
    Navigation,
}

#[derive(Debug, Clone)]
pub(crate) struct TickInput {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) current_time: f64,
    pub(crate) visible: bool,
    pub(crate) boundary: Option<BoundaryKind>,
}

#[derive(Debug)]
pub(crate) struct TickOutcome {
    pub(crate) capture: Option<CaptureRequest>,
    pub(crate) should_checkpoint: bool,
    pub(crate) should_flush: bool,
}

/// The redis-persisted checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MirrorState {
    pub(crate) seed: u32,
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) current_time_seconds: f64,
    pub(crate) captured_videos: Vec<VideoRef>,
    pub(crate) last_capture_unix: Option<i64>,
    pub(crate) fallback_fired: bool,
}

pub(crate) struct LearningSession {
    user_id: String,
    course_id: String,
    scheduler: CaptureScheduler,
    section: SectionKind,
    video_index: i32,
    current_time: f64,
    last_checkpoint_at: OffsetDateTime,
    last_flush_at: OffsetDateTime,
    last_seen_at: OffsetDateTime,
    dirty: bool,
}

impl LearningSession {
    pub(crate) fn new(
        user_id: String,
        course_id: String,
        seed: u32,
        throttle_seconds: u64,
        now: OffsetDateTime,
    ) -> Self {
        let scheduler = CaptureScheduler::new(seed, course_id.clone(), throttle_seconds);
        Self {
            user_id,
            course_id,
            scheduler,
            section: SectionKind::Theory,
            video_index: 0,
            current_time: 0.0,
            last_checkpoint_at: now,
            last_flush_at: now,
            last_seen_at: now,
            dirty: false,
        }
    }

    pub(crate) fn hydrate(&mut self, mirror: &MirrorState) {
        self.section = mirror.section;
        self.video_index = mirror.video_index;
        self.current_time = mirror.current_time_seconds;
        self.scheduler.restore(
            mirror.captured_videos.iter().map(|v| (v.section, v.index)),
            mirror
                .last_capture_unix
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            mirror.fallback_fired,
        );
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut CaptureScheduler {
        &mut self.scheduler
    }

    pub(crate) fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn course_id(&self) -> &str {
        &self.course_id
    }

    pub(crate) fn last_seen_at(&self) -> OffsetDateTime {
        self.last_seen_at
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mirror_state(&self) -> MirrorState {
        MirrorState {
            seed: self.scheduler.seed(),
            section: self.section,
            video_index: self.video_index,
            current_time_seconds: self.current_time,
            captured_videos: self
                .scheduler
                .captured_videos()
                .into_iter()
                .map(|(section, index)| VideoRef { section, index })
                .collect(),
            last_capture_unix: self.scheduler.last_capture_at().map(|at| at.unix_timestamp()),
            fallback_fired: self.scheduler.fallback_fired(),
        }
    }

    pub(crate) fn position(&self) -> (SectionKind, i32, f64) {
        (self.section, self.video_index, self.current_time)
    }

    pub(crate) fn apply_tick(
        &mut self,
        tick: &TickInput,
        course: &Course,
        policy: &SyncPolicy,
        now: OffsetDateTime,
    ) -> TickOutcome {
        let same_video = tick.section == self.section && tick.video_index == self.video_index;
        let prev_time = if same_video { self.current_time } else { 0.0 };

        let duration = course
            .video(tick.section, tick.video_index)
            .map(|video| video.length_seconds)
            .unwrap_or(0.0);

        let total = course.total_videos();
        let progress_ratio = if total == 0 {
            0.0
        } else {
            course.video_ordinal(tick.section, tick.video_index) as f64 / total as f64
        };

        let capture = self.scheduler.observe(
            &PlaybackTick {
                section: tick.section,
                video_index: tick.video_index,
                prev_time,
                current_time: tick.current_time,
                visible: tick.visible,
            },
            duration,
            progress_ratio,
            now,
        );

        self.section = tick.section;
        self.video_index = tick.video_index;
        self.current_time = tick.current_time;
        self.last_seen_at = now;
        self.dirty = true;

        let should_flush =
            tick.boundary.is_some() || now - self.last_flush_at >= policy.flush_every;
        let should_checkpoint =
            should_flush || now - self.last_checkpoint_at >= policy.checkpoint_every;

        TickOutcome { capture, should_checkpoint, should_flush }
    }

    /// Align the mirror with an authoritative write that happened outside
    /// the tick path (an advance landing, for instance).
    pub(crate) fn sync_position(&mut self, section: SectionKind, video_index: i32, time: f64) {
        self.section = section;
        self.video_index = video_index;
        self.current_time = time;
    }

    fn mark_checkpointed(&mut self, now: OffsetDateTime) {
        self.last_checkpoint_at = now;
    }

    fn mark_flushed(&mut self, now: OffsetDateTime) {
        self.last_flush_at = now;
        self.last_checkpoint_at = now;
        self.dirty = false;
    }
}

type SessionKey = (String, String);

#[derive(Clone)]
pub(crate) struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionKey, Arc<Mutex<LearningSession>>>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub(crate) async fn get(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Option<Arc<Mutex<LearningSession>>> {
        let map = self.inner.read().await;
        map.get(&(user_id.to_string(), course_id.to_string())).cloned()
    }

    /// Insert unless another request won the race; either way the caller gets
    /// the canonical instance.
    pub(crate) async fn insert_or_existing(
        &self,
        session: LearningSession,
    ) -> Arc<Mutex<LearningSession>> {
        let key = (session.user_id.clone(), session.course_id.clone());
        let mut map = self.inner.write().await;
        map.entry(key).or_insert_with(|| Arc::new(Mutex::new(session))).clone()
    }

    pub(crate) async fn remove(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Option<Arc<Mutex<LearningSession>>> {
        let mut map = self.inner.write().await;
        map.remove(&(user_id.to_string(), course_id.to_string()))
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<Mutex<LearningSession>>> {
        let map = self.inner.read().await;
        map.values().cloned().collect()
    }
}

fn seed_key(user_id: &str, course_id: &str) -> String {
    format!("attestia:capture-seed:{user_id}:{course_id}")
}

fn mirror_key(user_id: &str, course_id: &str) -> String {
    format!("attestia:mirror:{user_id}:{course_id}")
}

/// Look up the live session or build one, hydrating from the redis mirror
/// when a previous session left a checkpoint behind.
pub(crate) async fn obtain_session(
    state: &AppState,
    user_id: &str,
    course_id: &str,
) -> Arc<Mutex<LearningSession>> {
    if let Some(session) = state.sessions().get(user_id, course_id).await {
        return session;
    }

    let now = OffsetDateTime::now_utc();
    let candidate = crate::services::proctoring::generate_seed();
    let seed = match state
        .redis()
        .ensure_seed(&seed_key(user_id, course_id), candidate, MIRROR_TTL_SECONDS)
        .await
    {
        Ok(Some(stored)) => stored,
        Ok(None) => candidate,
        Err(err) => {
            tracing::warn!(user_id, course_id, error = %err, "Capture seed unavailable; using ephemeral seed");
            candidate
        }
    };

    let mirror: Option<MirrorState> =
        match state.redis().fetch_json(&mirror_key(user_id, course_id)).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(user_id, course_id, error = %err, "Failed to read session mirror");
                None
            }
        };

    // A surviving mirror wins over the seed key so cached targets stay
    // consistent even if one of the two entries expired first.
    let seed = mirror.as_ref().map(|m| m.seed).unwrap_or(seed);

    let mut session = LearningSession::new(
        user_id.to_string(),
        course_id.to_string(),
        seed,
        state.settings().proctoring().capture_throttle_seconds,
        now,
    );
    if let Some(mirror) = &mirror {
        session.hydrate(mirror);
    }

    state.sessions().insert_or_existing(session).await
}

pub(crate) async fn checkpoint(state: &AppState, session: &mut LearningSession) {
    let now = OffsetDateTime::now_utc();
    let key = mirror_key(&session.user_id, &session.course_id);
    match state.redis().put_json(&key, &session.mirror_state(), MIRROR_TTL_SECONDS).await {
        Ok(true) => {
            metrics::counter!("playback_checkpoints_total").increment(1);
            session.mark_checkpointed(now);
        }
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(
                user_id = %session.user_id,
                course_id = %session.course_id,
                error = %err,
                "Failed to checkpoint session mirror"
            );
        }
    }
}

/// Authoritative write of the playback position. Sync failures are logged
/// and retried on the next boundary; they never interrupt playback.
pub(crate) async fn flush(state: &AppState, session: &mut LearningSession) {
    let now = OffsetDateTime::now_utc();
    let (section, video_index, current_time) = session.position();

    match repositories::progress::update_position(
        state.db(),
        &session.user_id,
        &session.course_id,
        section,
        video_index,
        current_time,
        primitive_now_utc(),
    )
    .await
    {
        Ok(_) => {
            metrics::counter!("playback_flushes_total").increment(1);
            session.mark_flushed(now);
        }
        Err(err) => {
            tracing::error!(
                user_id = %session.user_id,
                course_id = %session.course_id,
                error = %err,
                "Failed to flush playback position"
            );
        }
    }
}

/// Flush and destroy the session object. The redis mirror is left in place
/// so a reload within the TTL resumes with the same capture schedule.
pub(crate) async fn end_session(state: &AppState, user_id: &str, course_id: &str) {
    let Some(session) = state.sessions().remove(user_id, course_id).await else {
        return;
    };

    let mut guard = session.lock().await;
    if guard.is_dirty() {
        flush(state, &mut guard).await;
    }
    checkpoint(state, &mut guard).await;
}

/// Drop every trace of the session: live object, mirror, and seed. Used by
/// full retake and administrative reset, where the next attempt must draw a
/// fresh schedule.
pub(crate) async fn invalidate_session(state: &AppState, user_id: &str, course_id: &str) {
    state.sessions().remove(user_id, course_id).await;

    for key in [seed_key(user_id, course_id), mirror_key(user_id, course_id)] {
        if let Err(err) = state.redis().remove(&key).await {
            tracing::warn!(user_id, course_id, key, error = %err, "Failed to invalidate session state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 10:00:00 UTC);

    fn policy() -> SyncPolicy {
        SyncPolicy {
            checkpoint_every: Duration::seconds(10),
            flush_every: Duration::seconds(180),
        }
    }

    fn session() -> LearningSession {
        LearningSession::new("user-1".to_string(), "course-1".to_string(), 42, 20, NOW)
    }

    fn tick_at(current_time: f64) -> TickInput {
        TickInput {
            section: SectionKind::Theory,
            video_index: 0,
            current_time,
            visible: true,
            boundary: None,
        }
    }

    #[test]
    fn quiet_tick_neither_checkpoints_nor_flushes() {
        let course = fixtures::course_with_videos(2, 2);
        let mut session = session();

        let outcome = session.apply_tick(&tick_at(5.0), &course, &policy(), NOW + Duration::seconds(5));
        assert!(!outcome.should_checkpoint);
        assert!(!outcome.should_flush);
        assert!(session.is_dirty());
    }

    #[test]
    fn checkpoint_interval_elapses_without_flush() {
        let course = fixtures::course_with_videos(2, 2);
        let mut session = session();

        let outcome =
            session.apply_tick(&tick_at(12.0), &course, &policy(), NOW + Duration::seconds(12));
        assert!(outcome.should_checkpoint);
        assert!(!outcome.should_flush);
    }

    #[test]
    fn flush_interval_elapses() {
        let course = fixtures::course_with_videos(2, 2);
        let mut session = session();

        let outcome =
            session.apply_tick(&tick_at(200.0), &course, &policy(), NOW + Duration::seconds(200));
        assert!(outcome.should_flush);
        assert!(outcome.should_checkpoint);
    }

    #[test]
    fn boundary_forces_immediate_flush() {
        let course = fixtures::course_with_videos(2, 2);
        let mut session = session();

        let mut tick = tick_at(3.0);
        tick.boundary = Some(BoundaryKind::Pause);
        let outcome = session.apply_tick(&tick, &course, &policy(), NOW + Duration::seconds(3));
        assert!(outcome.should_flush);
    }

    #[test]
    fn switching_videos_resets_the_crossing_baseline() {
        let course = fixtures::course_with_videos(2, 2);
        let mut session = session();

        // Play deep into video 0 so its position is far past any target,
        // settling the capture that crossing fires along the way.
        let outcome =
            session.apply_tick(&tick_at(250.0), &course, &policy(), NOW + Duration::seconds(1));
        if outcome.capture.is_some() {
            session.scheduler_mut().fail();
        }

        // First tick of video 1 starts from prev_time 0: a tick landing past
        // the target fires because the crossing is evaluated within the tick.
        let target = session
            .scheduler_mut()
            .target_for(SectionKind::Theory, 1, 300.0);
        let tick = TickInput {
            section: SectionKind::Theory,
            video_index: 1,
            current_time: target + 1.0,
            visible: true,
            boundary: None,
        };
        let outcome = session.apply_tick(&tick, &course, &policy(), NOW + Duration::seconds(2));
        assert!(outcome.capture.is_some());
    }

    #[test]
    fn mirror_roundtrip_preserves_capture_state() {
        let mut session = session();
        let course = fixtures::course_with_videos(2, 2);

        let target = session.scheduler_mut().target_for(SectionKind::Theory, 0, 300.0);
        session.apply_tick(&tick_at(target + 1.0), &course, &policy(), NOW + Duration::seconds(1));
        session.scheduler_mut().complete(SectionKind::Theory, 0, NOW + Duration::seconds(1));

        let mirror = session.mirror_state();
        assert_eq!(mirror.seed, 42);
        assert_eq!(mirror.captured_videos, vec![VideoRef { section: SectionKind::Theory, index: 0 }]);

        let mut restored =
            LearningSession::new("user-1".to_string(), "course-1".to_string(), 42, 20, NOW);
        restored.hydrate(&mirror);
        assert_eq!(restored.position().2, mirror.current_time_seconds);

        // The captured video stays captured after rehydration.
        let replay = TickInput {
            section: SectionKind::Theory,
            video_index: 0,
            current_time: target + 1.0,
            visible: true,
            boundary: None,
        };
        let outcome =
            restored.apply_tick(&replay, &course, &policy(), NOW + Duration::minutes(5));
        assert!(outcome.capture.is_none());
    }

    #[tokio::test]
    async fn registry_insert_is_first_writer_wins() {
        let registry = SessionRegistry::new();

        let first = registry.insert_or_existing(session()).await;
        let second = registry.insert_or_existing(session()).await;
        assert!(Arc::ptr_eq(&first, &second));

        assert!(registry.get("user-1", "course-1").await.is_some());
        registry.remove("user-1", "course-1").await;
        assert!(registry.get("user-1", "course-1").await.is_none());
    }
}
