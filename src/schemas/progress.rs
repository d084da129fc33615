use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::{Course, Progress, ProgressArchive, VideoRef};
use crate::db::types::SectionKind;
use crate::schemas::exam::ExamResultResponse;
use crate::services::gating;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StartProgress {
    #[serde(default, alias = "startImageUrl")]
    pub(crate) start_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdvanceVideo {
    pub(crate) section: SectionKind,
    #[serde(alias = "videoIndex")]
    pub(crate) video_index: i32,
}

/// View-again navigation cursor. `section = exam` with no index targets the
/// exam page.
#[derive(Debug, Deserialize)]
pub(crate) struct ViewTarget {
    pub(crate) section: SectionKind,
    #[serde(default, alias = "videoIndex")]
    pub(crate) video_index: Option<i32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ViewCursor {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct AccessibleSections {
    pub(crate) theory: bool,
    pub(crate) practice: bool,
    pub(crate) exam: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct CaptureAnnotation {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) time_seconds: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProgressResponse {
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) current_section: SectionKind,
    pub(crate) current_video_index: i32,
    pub(crate) current_time_seconds: f64,
    pub(crate) completed_videos: Vec<VideoRef>,
    pub(crate) is_completed: bool,
    pub(crate) started_at: String,
    pub(crate) last_updated_at: String,
    pub(crate) start_image_url: Option<String>,
    pub(crate) finish_image_url: Option<String>,
    pub(crate) last_capture: Option<CaptureAnnotation>,
    pub(crate) exam_result: Option<ExamResultResponse>,
    /// Derived from the snapshot on every read, never cached.
    pub(crate) accessible_sections: AccessibleSections,
}

pub(crate) fn progress_response(course: &Course, progress: &Progress) -> ProgressResponse {
    let accessible_sections = AccessibleSections {
        theory: gating::is_section_accessible(course, progress, SectionKind::Theory),
        practice: gating::is_section_accessible(course, progress, SectionKind::Practice),
        exam: gating::is_section_accessible(course, progress, SectionKind::Exam),
    };

    let last_capture = match (
        progress.last_capture_section,
        progress.last_capture_video_index,
        progress.last_capture_time_seconds,
    ) {
        (Some(section), Some(video_index), Some(time_seconds)) => {
            Some(CaptureAnnotation { section, video_index, time_seconds })
        }
        _ => None,
    };

    ProgressResponse {
        user_id: progress.user_id.clone(),
        course_id: progress.course_id.clone(),
        current_section: progress.current_section,
        current_video_index: progress.current_video_index,
        current_time_seconds: progress.current_time_seconds,
        completed_videos: progress.completed_videos.0.clone(),
        is_completed: progress.is_completed,
        started_at: format_primitive(progress.started_at),
        last_updated_at: format_primitive(progress.last_updated_at),
        start_image_url: progress.start_image_url.clone(),
        finish_image_url: progress.finish_image_url.clone(),
        last_capture,
        exam_result: progress.exam_result.as_ref().map(|r| ExamResultResponse::from_record(&r.0)),
        accessible_sections,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ArchiveResponse {
    pub(crate) attempt_number: i32,
    pub(crate) archived_at: String,
    pub(crate) snapshot: serde_json::Value,
}

impl ArchiveResponse {
    pub(crate) fn from_row(archive: &ProgressArchive) -> Self {
        Self {
            attempt_number: archive.attempt_number,
            archived_at: format_primitive(archive.archived_at),
            snapshot: archive.snapshot.0.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RetakeResponse {
    pub(crate) attempt_number: i32,
    pub(crate) progress: ProgressResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    #[test]
    fn accessible_sections_are_derived_from_the_snapshot() {
        let course = fixtures::course_with_videos(1, 1);
        let mut progress = fixtures::fresh_progress(&course);

        let response = progress_response(&course, &progress);
        assert!(response.accessible_sections.theory);
        assert!(!response.accessible_sections.practice);
        assert!(!response.accessible_sections.exam);

        fixtures::complete_video(&mut progress, SectionKind::Theory, 0);
        fixtures::complete_video(&mut progress, SectionKind::Practice, 0);

        let response = progress_response(&course, &progress);
        assert!(response.accessible_sections.practice);
        assert!(response.accessible_sections.exam);
    }

    #[test]
    fn capture_annotation_requires_all_three_fields() {
        let course = fixtures::course_with_videos(1, 1);
        let mut progress = fixtures::fresh_progress(&course);
        progress.last_capture_section = Some(SectionKind::Theory);

        let response = progress_response(&course, &progress);
        assert!(response.last_capture.is_none());
    }
}
