//! Proof-of-presence capture scheduling.
//!
//! Each video gets one pseudo-random target second, derived from a per-course
//! seed so the moment is neither constant nor predictable, yet reproducible
//! across page reloads without a server round-trip. The hash only needs to
//! deter casual gaming, not adversarial attackers, so FNV-1a + xorshift is
//! plenty.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use time::OffsetDateTime;

use crate::db::types::SectionKind;

/// Once the learner is this far through the course, a missed target no
/// longer goes unanswered: the fallback fires at the 10-second mark of the
/// current video.
pub(crate) const FALLBACK_PROGRESS_RATIO: f64 = 0.8;
pub(crate) const FALLBACK_MARK_SECONDS: f64 = 10.0;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub(crate) fn generate_seed() -> u32 {
    // 31-bit so the seed survives storage as a signed integer anywhere.
    rand::thread_rng().gen_range(0..0x8000_0000u32)
}

fn fnv1a_32(input: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    fn new(seed: u32) -> Self {
        Self { state: if seed == 0 { 0x9e37_79b9 } else { seed } }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn next_unit(&mut self) -> f64 {
        f64::from(self.next_u32() >> 8) / f64::from(1u32 << 24)
    }
}

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if hi < lo {
        hi
    } else {
        value.max(lo).min(hi)
    }
}

/// The eligible capture window avoids the trivially-skippable start and the
/// predictable end of the video. Degenerate (very short) durations collapse
/// toward [0, duration].
pub(crate) fn capture_window(duration: f64) -> (f64, f64) {
    if duration <= 0.0 {
        return (0.0, 0.0);
    }

    let min = clamp(0.15 * duration, 5.0, duration - 10.0).max(0.0);
    let max = clamp(0.85 * duration, min + 1.0, duration - 5.0);

    if max < min {
        (min, min)
    } else {
        (min, max)
    }
}

/// One target per (course seed, video key), stable for the same inputs.
pub(crate) fn target_time(
    seed: u32,
    course_id: &str,
    section: SectionKind,
    video_index: i32,
    duration: f64,
) -> f64 {
    let key = format!("{seed}:{course_id}:{}:{video_index}", section.as_str());
    let mut rng = Xorshift32::new(fnv1a_32(&key));
    let (min, max) = capture_window(duration);
    min + rng.next_unit() * (max - min)
}

/// Burned into the frame by the playback surface so each stored photo is
/// legible on its own during an audit.
pub(crate) fn overlay_caption(
    course_title: &str,
    section: SectionKind,
    video_index: i32,
    elapsed_seconds: f64,
) -> String {
    let elapsed = elapsed_seconds.max(0.0) as u64;
    let (hours, minutes, seconds) = (elapsed / 3600, (elapsed % 3600) / 60, elapsed % 60);
    if hours > 0 {
        format!(
            "{course_title} | {} {:02} | {hours}:{minutes:02}:{seconds:02}",
            section.as_str(),
            video_index
        )
    } else {
        format!(
            "{course_title} | {} {:02} | {minutes:02}:{seconds:02}",
            section.as_str(),
            video_index
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PlaybackTick {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) prev_time: f64,
    pub(crate) current_time: f64,
    pub(crate) visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CaptureRequest {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) target_seconds: f64,
    pub(crate) fallback: bool,
}

/// Session-scoped capture state: one instance per active learning session,
/// destroyed with it. Targets are cached for the session lifetime; the
/// single-flight guard and the per-course throttle serialize actual uploads.
pub(crate) struct CaptureScheduler {
    seed: u32,
    course_id: String,
    throttle_seconds: u64,
    targets: HashMap<(SectionKind, i32), f64>,
    captured: HashSet<(SectionKind, i32)>,
    in_flight: Option<(SectionKind, i32)>,
    last_capture_at: Option<OffsetDateTime>,
    fallback_fired: bool,
}

impl CaptureScheduler {
    pub(crate) fn new(seed: u32, course_id: String, throttle_seconds: u64) -> Self {
        Self {
            seed,
            course_id,
            throttle_seconds,
            targets: HashMap::new(),
            captured: HashSet::new(),
            in_flight: None,
            last_capture_at: None,
            fallback_fired: false,
        }
    }

    pub(crate) fn seed(&self) -> u32 {
        self.seed
    }

    pub(crate) fn fallback_fired(&self) -> bool {
        self.fallback_fired
    }

    pub(crate) fn captured_videos(&self) -> Vec<(SectionKind, i32)> {
        self.captured.iter().copied().collect()
    }

    pub(crate) fn last_capture_at(&self) -> Option<OffsetDateTime> {
        self.last_capture_at
    }

    /// Rehydrate from a mirror checkpoint after a reload.
    pub(crate) fn restore(
        &mut self,
        captured: impl IntoIterator<Item = (SectionKind, i32)>,
        last_capture_at: Option<OffsetDateTime>,
        fallback_fired: bool,
    ) {
        self.captured = captured.into_iter().collect();
        self.last_capture_at = last_capture_at;
        self.fallback_fired = fallback_fired;
    }

    pub(crate) fn target_for(
        &mut self,
        section: SectionKind,
        video_index: i32,
        duration: f64,
    ) -> f64 {
        let seed = self.seed;
        let course_id = &self.course_id;
        *self
            .targets
            .entry((section, video_index))
            .or_insert_with(|| target_time(seed, course_id, section, video_index, duration))
    }

    /// Decide whether this tick fires a capture. A returned request arms the
    /// single-flight guard; the caller must settle it with `complete` or
    /// `fail`.
    pub(crate) fn observe(
        &mut self,
        tick: &PlaybackTick,
        duration: f64,
        progress_ratio: f64,
        now: OffsetDateTime,
    ) -> Option<CaptureRequest> {
        if self.in_flight.is_some() || !tick.visible || self.throttled(now) {
            return None;
        }

        let video = (tick.section, tick.video_index);

        // Late-course fallback: guarantees a proof photo even if every
        // computed target was seeked past.
        if !self.fallback_fired
            && progress_ratio >= FALLBACK_PROGRESS_RATIO
            && crossed(tick, FALLBACK_MARK_SECONDS)
        {
            self.fallback_fired = true;
            self.in_flight = Some(video);
            return Some(CaptureRequest {
                section: tick.section,
                video_index: tick.video_index,
                target_seconds: FALLBACK_MARK_SECONDS,
                fallback: true,
            });
        }

        if self.captured.contains(&video) {
            return None;
        }

        let target = self.target_for(tick.section, tick.video_index, duration);
        if crossed(tick, target) {
            self.in_flight = Some(video);
            return Some(CaptureRequest {
                section: tick.section,
                video_index: tick.video_index,
                target_seconds: target,
                fallback: false,
            });
        }

        None
    }

    pub(crate) fn complete(&mut self, section: SectionKind, video_index: i32, now: OffsetDateTime) {
        self.captured.insert((section, video_index));
        self.last_capture_at = Some(now);
        self.in_flight = None;
    }

    /// Release the guard without marking the video captured; a later
    /// qualifying crossing may retry.
    pub(crate) fn fail(&mut self) {
        self.in_flight = None;
    }

    fn throttled(&self, now: OffsetDateTime) -> bool {
        self.last_capture_at
            .map(|at| (now - at).whole_seconds() < self.throttle_seconds as i64)
            .unwrap_or(false)
    }
}

fn crossed(tick: &PlaybackTick, target: f64) -> bool {
    tick.prev_time < target && target <= tick.current_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 10:00:00 UTC);

    fn scheduler() -> CaptureScheduler {
        CaptureScheduler::new(12345, "course-1".to_string(), 20)
    }

    fn tick(section: SectionKind, index: i32, prev: f64, current: f64) -> PlaybackTick {
        PlaybackTick { section, video_index: index, prev_time: prev, current_time: current, visible: true }
    }

    #[test]
    fn target_is_deterministic_for_same_inputs() {
        let a = target_time(42, "course-1", SectionKind::Theory, 0, 300.0);
        let b = target_time(42, "course-1", SectionKind::Theory, 0, 300.0);
        assert_eq!(a, b);
    }

    #[test]
    fn target_varies_across_videos_and_seeds() {
        let base = target_time(42, "course-1", SectionKind::Theory, 0, 300.0);
        let other_video = target_time(42, "course-1", SectionKind::Theory, 1, 300.0);
        let other_seed = target_time(43, "course-1", SectionKind::Theory, 0, 300.0);
        assert_ne!(base, other_video);
        assert_ne!(base, other_seed);
    }

    #[test]
    fn target_stays_inside_the_window() {
        for duration in [30.0, 60.0, 300.0, 3600.0] {
            let (min, max) = capture_window(duration);
            for seed in 0..50u32 {
                let target =
                    target_time(seed, "course-1", SectionKind::Practice, 3, duration);
                assert!(target >= min && target <= max, "target {target} outside [{min}, {max}]");
                assert!(target >= 0.15 * duration - 5.0 && target <= 0.85 * duration + 1.0);
            }
        }
    }

    #[test]
    fn window_respects_fractional_bounds_for_long_videos() {
        let (min, max) = capture_window(600.0);
        assert_eq!(min, 90.0);
        assert_eq!(max, 510.0);
    }

    #[test]
    fn window_degenerates_gracefully_for_short_videos() {
        let (min, max) = capture_window(6.0);
        assert!(min >= 0.0);
        assert!(max >= min);
        assert!(max <= 6.0);
    }

    #[test]
    fn fires_when_playback_crosses_target() {
        let mut scheduler = scheduler();
        let target = scheduler.target_for(SectionKind::Theory, 0, 300.0);

        let before = tick(SectionKind::Theory, 0, target - 10.0, target - 5.0);
        assert!(scheduler.observe(&before, 300.0, 0.1, NOW).is_none());

        let crossing = tick(SectionKind::Theory, 0, target - 1.0, target + 1.0);
        let request = scheduler.observe(&crossing, 300.0, 0.1, NOW).expect("capture");
        assert!(!request.fallback);
        assert_eq!(request.target_seconds, target);
    }

    #[test]
    fn hidden_tab_suppresses_capture() {
        let mut scheduler = scheduler();
        let target = scheduler.target_for(SectionKind::Theory, 0, 300.0);

        let mut crossing = tick(SectionKind::Theory, 0, target - 1.0, target + 1.0);
        crossing.visible = false;
        assert!(scheduler.observe(&crossing, 300.0, 0.1, NOW).is_none());
    }

    #[test]
    fn single_flight_blocks_second_request_until_settled() {
        let mut scheduler = scheduler();
        let target = scheduler.target_for(SectionKind::Theory, 0, 300.0);
        let crossing = tick(SectionKind::Theory, 0, target - 1.0, target + 1.0);

        assert!(scheduler.observe(&crossing, 300.0, 0.1, NOW).is_some());
        assert!(scheduler.observe(&crossing, 300.0, 0.1, NOW).is_none());

        scheduler.fail();
        assert!(scheduler.observe(&crossing, 300.0, 0.1, NOW).is_some());
    }

    #[test]
    fn completed_video_never_captures_twice() {
        let mut scheduler = scheduler();
        let target = scheduler.target_for(SectionKind::Theory, 0, 300.0);
        let crossing = tick(SectionKind::Theory, 0, target - 1.0, target + 1.0);

        assert!(scheduler.observe(&crossing, 300.0, 0.1, NOW).is_some());
        scheduler.complete(SectionKind::Theory, 0, NOW);

        let later = NOW + time::Duration::minutes(5);
        assert!(scheduler.observe(&crossing, 300.0, 0.1, later).is_none());
    }

    #[test]
    fn throttle_spaces_out_captures_across_videos() {
        let mut scheduler = scheduler();
        let target0 = scheduler.target_for(SectionKind::Theory, 0, 300.0);
        let crossing0 = tick(SectionKind::Theory, 0, target0 - 1.0, target0 + 1.0);
        assert!(scheduler.observe(&crossing0, 300.0, 0.1, NOW).is_some());
        scheduler.complete(SectionKind::Theory, 0, NOW);

        let target1 = scheduler.target_for(SectionKind::Theory, 1, 300.0);
        let crossing1 = tick(SectionKind::Theory, 1, target1 - 1.0, target1 + 1.0);

        let soon = NOW + time::Duration::seconds(10);
        assert!(scheduler.observe(&crossing1, 300.0, 0.2, soon).is_none());

        let later = NOW + time::Duration::seconds(25);
        assert!(scheduler.observe(&crossing1, 300.0, 0.2, later).is_some());
    }

    #[test]
    fn fallback_fires_once_late_in_the_course() {
        let mut scheduler = scheduler();
        let crossing = tick(SectionKind::Practice, 4, 9.0, 11.0);

        let request = scheduler.observe(&crossing, 300.0, 0.85, NOW).expect("fallback");
        assert!(request.fallback);
        assert_eq!(request.target_seconds, FALLBACK_MARK_SECONDS);
        scheduler.complete(SectionKind::Practice, 4, NOW);

        // Latch is per course: no second fallback.
        let next = tick(SectionKind::Practice, 5, 9.0, 11.0);
        let later = NOW + time::Duration::minutes(2);
        let request = scheduler.observe(&next, 300.0, 0.9, later);
        assert!(request.map(|r| !r.fallback).unwrap_or(true));
    }

    #[test]
    fn fallback_needs_the_ratio_threshold() {
        let mut scheduler = scheduler();
        let crossing = tick(SectionKind::Theory, 0, 9.0, 11.0);
        assert!(scheduler.observe(&crossing, 300.0, 0.5, NOW).is_none());
    }

    #[test]
    fn overlay_caption_is_audit_legible() {
        let caption = overlay_caption("Forklift Safety", SectionKind::Practice, 2, 754.0);
        assert_eq!(caption, "Forklift Safety | practice 02 | 12:34");

        let long = overlay_caption("Forklift Safety", SectionKind::Theory, 0, 3725.0);
        assert_eq!(long, "Forklift Safety | theory 00 | 1:02:05");
    }

    #[test]
    fn generated_seeds_fit_31_bits() {
        for _ in 0..100 {
            assert!(generate_seed() < 0x8000_0000);
        }
    }
}
