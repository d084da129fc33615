//! Section gating and the advance transition, shared by every caller that
//! needs them. Both are pure over a (course, progress) snapshot so the same
//! rules run client-side for display and server-side for enforcement, and
//! can never drift apart or go stale.

use crate::db::models::{Course, Progress, VideoRef};
use crate::db::types::SectionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdvanceError {
    /// Section/index outside the current course definition.
    UnknownVideo,
    /// Video exists but is not in the learner's current section.
    WrongSection,
    /// Video is in the current section but is neither the current video nor
    /// an already-completed one.
    NotCurrentVideo,
    /// The named section is not yet reachable for this learner.
    SectionLocked,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AdvanceOutcome {
    pub(crate) completed_videos: Vec<VideoRef>,
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) section_changed: bool,
    /// False for duplicate deliveries and for view-again traffic on a
    /// completed course: nothing to persist, no side effects to re-trigger.
    pub(crate) mutated: bool,
}

/// True when every gating video of the section is in the completed set.
/// Videos not marked complete-to-pass are optional extras.
pub(crate) fn section_completed(course: &Course, progress: &Progress, kind: SectionKind) -> bool {
    let Some(section) = course.section(kind) else {
        return true;
    };

    section
        .videos
        .iter()
        .enumerate()
        .filter(|(_, video)| video.complete_to_pass)
        .all(|(index, _)| progress.has_completed(kind, index as i32))
}

pub(crate) fn is_section_accessible(
    course: &Course,
    progress: &Progress,
    kind: SectionKind,
) -> bool {
    if progress.is_completed {
        return true;
    }

    match kind {
        SectionKind::Theory => true,
        SectionKind::Practice => section_completed(course, progress, SectionKind::Theory),
        SectionKind::Exam => {
            section_completed(course, progress, SectionKind::Theory)
                && section_completed(course, progress, SectionKind::Practice)
        }
    }
}

/// The `advanceVideo` transition. Idempotent against at-least-once delivery:
/// re-advancing a video already in the completed set reports `mutated =
/// false` and leaves the position untouched.
pub(crate) fn apply_advance(
    course: &Course,
    progress: &Progress,
    section: SectionKind,
    index: i32,
) -> Result<AdvanceOutcome, AdvanceError> {
    if course.video(section, index).is_none() {
        return Err(AdvanceError::UnknownVideo);
    }

    let unchanged = AdvanceOutcome {
        completed_videos: progress.completed_videos.0.clone(),
        section: progress.current_section,
        video_index: progress.current_video_index,
        section_changed: false,
        mutated: false,
    };

    // Completion is sticky: a completed course only permits view-again
    // navigation, never a canonical mutation.
    if progress.is_completed {
        return Ok(unchanged);
    }

    if progress.has_completed(section, index) {
        return Ok(unchanged);
    }

    if section != progress.current_section {
        return Err(AdvanceError::WrongSection);
    }

    if !is_section_accessible(course, progress, section) {
        return Err(AdvanceError::SectionLocked);
    }

    if index != progress.current_video_index {
        return Err(AdvanceError::NotCurrentVideo);
    }

    let mut completed = progress.completed_videos.0.clone();
    completed.push(VideoRef { section, index });

    let section_len = course.video_count(section) as i32;
    let (next_section, next_index, section_changed) = if index + 1 < section_len {
        (section, index + 1, false)
    } else {
        (next_nonempty_section(course, section), 0, true)
    };

    Ok(AdvanceOutcome {
        completed_videos: completed,
        section: next_section,
        video_index: next_index,
        section_changed,
        mutated: true,
    })
}

/// Sections with no videos are skipped on transition, so a course without
/// practice content moves straight from theory to the exam.
fn next_nonempty_section(course: &Course, current: SectionKind) -> SectionKind {
    let mut cursor = current;
    while let Some(next) = cursor.next() {
        cursor = next;
        if cursor == SectionKind::Exam || course.video_count(cursor) > 0 {
            return cursor;
        }
    }
    SectionKind::Exam
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    #[test]
    fn theory_is_always_accessible() {
        let course = fixtures::course_with_videos(2, 2);
        let progress = fixtures::fresh_progress(&course);
        assert!(is_section_accessible(&course, &progress, SectionKind::Theory));
        assert!(!is_section_accessible(&course, &progress, SectionKind::Practice));
        assert!(!is_section_accessible(&course, &progress, SectionKind::Exam));
    }

    #[test]
    fn practice_unlocks_after_all_theory_videos() {
        let course = fixtures::course_with_videos(2, 1);
        let mut progress = fixtures::fresh_progress(&course);

        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        assert!(!is_section_accessible(&course, &progress, SectionKind::Practice));

        fixtures::complete_video(&mut progress, SectionKind::Theory, 1);
        assert!(is_section_accessible(&course, &progress, SectionKind::Practice));
        assert!(!is_section_accessible(&course, &progress, SectionKind::Exam));
    }

    #[test]
    fn exam_requires_theory_and_practice() {
        let course = fixtures::course_with_videos(1, 1);
        let mut progress = fixtures::fresh_progress(&course);

        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        assert!(!is_section_accessible(&course, &progress, SectionKind::Exam));

        fixtures::complete_video(&mut progress, SectionKind::Practice, 0);
        assert!(is_section_accessible(&course, &progress, SectionKind::Exam));
    }

    #[test]
    fn optional_videos_do_not_gate() {
        let mut course = fixtures::course_with_videos(2, 0);
        course.theory.0.videos[1].complete_to_pass = false;
        let mut progress = fixtures::fresh_progress(&course);

        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        assert!(is_section_accessible(&course, &progress, SectionKind::Practice));
    }

    #[test]
    fn completed_course_opens_every_section() {
        let course = fixtures::course_with_videos(2, 2);
        let mut progress = fixtures::fresh_progress(&course);
        progress.is_completed = true;

        assert!(is_section_accessible(&course, &progress, SectionKind::Practice));
        assert!(is_section_accessible(&course, &progress, SectionKind::Exam));
    }

    #[test]
    fn advance_marks_completed_and_increments() {
        let course = fixtures::course_with_videos(3, 1);
        let progress = fixtures::fresh_progress(&course);

        let outcome = apply_advance(&course, &progress, SectionKind::Theory, 0).expect("advance");
        assert!(outcome.mutated);
        assert!(!outcome.section_changed);
        assert_eq!(outcome.section, SectionKind::Theory);
        assert_eq!(outcome.video_index, 1);
        assert_eq!(outcome.completed_videos.len(), 1);
    }

    #[test]
    fn advance_last_theory_video_enters_practice() {
        let course = fixtures::course_with_videos(2, 2);
        let mut progress = fixtures::fresh_progress(&course);
        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        progress.current_video_index = 1;

        let outcome = apply_advance(&course, &progress, SectionKind::Theory, 1).expect("advance");
        assert!(outcome.mutated);
        assert!(outcome.section_changed);
        assert_eq!(outcome.section, SectionKind::Practice);
        assert_eq!(outcome.video_index, 0);
    }

    #[test]
    fn advance_last_practice_video_enters_exam() {
        let course = fixtures::course_with_videos(1, 1);
        let mut progress = fixtures::fresh_progress(&course);
        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        progress.current_section = SectionKind::Practice;
        progress.current_video_index = 0;

        let outcome = apply_advance(&course, &progress, SectionKind::Practice, 0).expect("advance");
        assert!(outcome.section_changed);
        assert_eq!(outcome.section, SectionKind::Exam);
        assert_eq!(outcome.video_index, 0);
    }

    #[test]
    fn advance_skips_empty_practice_section() {
        let course = fixtures::course_with_videos(1, 0);
        let progress = fixtures::fresh_progress(&course);

        let outcome = apply_advance(&course, &progress, SectionKind::Theory, 0).expect("advance");
        assert_eq!(outcome.section, SectionKind::Exam);
    }

    #[test]
    fn duplicate_advance_is_a_noop() {
        let course = fixtures::course_with_videos(2, 1);
        let mut progress = fixtures::fresh_progress(&course);

        let first = apply_advance(&course, &progress, SectionKind::Theory, 0).expect("advance");
        progress.completed_videos.0 = first.completed_videos.clone();
        progress.current_video_index = first.video_index;

        let second = apply_advance(&course, &progress, SectionKind::Theory, 0).expect("advance");
        assert!(!second.mutated);
        assert_eq!(second.completed_videos, first.completed_videos);
        assert_eq!(second.video_index, first.video_index);
    }

    #[test]
    fn advance_rejects_unknown_video() {
        let course = fixtures::course_with_videos(2, 1);
        let progress = fixtures::fresh_progress(&course);

        assert_eq!(
            apply_advance(&course, &progress, SectionKind::Theory, 5),
            Err(AdvanceError::UnknownVideo)
        );
        assert_eq!(
            apply_advance(&course, &progress, SectionKind::Exam, 0),
            Err(AdvanceError::UnknownVideo)
        );
    }

    #[test]
    fn advance_rejects_locked_section_and_skipped_video() {
        let course = fixtures::course_with_videos(2, 1);
        let progress = fixtures::fresh_progress(&course);

        assert_eq!(
            apply_advance(&course, &progress, SectionKind::Practice, 0),
            Err(AdvanceError::WrongSection)
        );
        assert_eq!(
            apply_advance(&course, &progress, SectionKind::Theory, 1),
            Err(AdvanceError::NotCurrentVideo)
        );
    }

    #[test]
    fn advance_on_completed_course_never_mutates() {
        let course = fixtures::course_with_videos(1, 1);
        let mut progress = fixtures::fresh_progress(&course);
        progress.is_completed = true;

        let outcome = apply_advance(&course, &progress, SectionKind::Theory, 0).expect("advance");
        assert!(!outcome.mutated);
        assert!(outcome.completed_videos.is_empty());
    }
}
