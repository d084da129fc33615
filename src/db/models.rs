use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::db::types::SectionKind;

/// A course version is immutable once published: the two video sections and
/// the question bank are stored as JSONB documents on the row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Course {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) theory: Json<SectionDef>,
    pub(crate) practice: Json<SectionDef>,
    pub(crate) exam: Json<ExamDef>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SectionDef {
    pub(crate) videos: Vec<VideoDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VideoDef {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) length_seconds: f64,
    #[serde(default = "default_true")]
    pub(crate) can_seek: bool,
    /// Videos marked false are optional extras and do not gate the next
    /// section or the exam.
    #[serde(default = "default_true")]
    pub(crate) complete_to_pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExamDef {
    pub(crate) group_id: String,
    pub(crate) questions: Vec<QuestionDef>,
    pub(crate) time_limit_seconds: i64,
    pub(crate) pass_score_percent: Option<f64>,
}

/// `correct_option_id` never leaves the server: learner-facing reads go
/// through the stripped payloads in `schemas::course`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QuestionDef {
    pub(crate) id: String,
    pub(crate) content: String,
    pub(crate) options: Vec<AnswerOption>,
    pub(crate) correct_option_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnswerOption {
    pub(crate) id: String,
    pub(crate) content: String,
}

fn default_true() -> bool {
    true
}

impl Course {
    pub(crate) fn section(&self, kind: SectionKind) -> Option<&SectionDef> {
        match kind {
            SectionKind::Theory => Some(&self.theory.0),
            SectionKind::Practice => Some(&self.practice.0),
            SectionKind::Exam => None,
        }
    }

    pub(crate) fn video(&self, kind: SectionKind, index: i32) -> Option<&VideoDef> {
        if index < 0 {
            return None;
        }
        self.section(kind).and_then(|section| section.videos.get(index as usize))
    }

    pub(crate) fn video_count(&self, kind: SectionKind) -> usize {
        self.section(kind).map(|section| section.videos.len()).unwrap_or(0)
    }

    pub(crate) fn total_videos(&self) -> usize {
        self.video_count(SectionKind::Theory) + self.video_count(SectionKind::Practice)
    }

    /// 1-based ordinal of a video across the theory+practice curriculum.
    pub(crate) fn video_ordinal(&self, kind: SectionKind, index: i32) -> usize {
        let offset = match kind {
            SectionKind::Theory => 0,
            SectionKind::Practice | SectionKind::Exam => self.video_count(SectionKind::Theory),
        };
        offset + index.max(0) as usize + 1
    }
}

/// One row per (learner, course). Written only through the progress state
/// machine; the completed-video set is membership-only, insertion order is
/// irrelevant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Progress {
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) current_section: SectionKind,
    pub(crate) current_video_index: i32,
    pub(crate) current_time_seconds: f64,
    pub(crate) completed_videos: Json<Vec<VideoRef>>,
    pub(crate) is_completed: bool,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) last_updated_at: PrimitiveDateTime,
    pub(crate) start_image_url: Option<String>,
    pub(crate) finish_image_url: Option<String>,
    pub(crate) last_capture_section: Option<SectionKind>,
    pub(crate) last_capture_video_index: Option<i32>,
    pub(crate) last_capture_time_seconds: Option<f64>,
    pub(crate) exam_result: Option<Json<ExamResultRecord>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct VideoRef {
    pub(crate) section: SectionKind,
    pub(crate) index: i32,
}

impl Progress {
    pub(crate) fn has_completed(&self, section: SectionKind, index: i32) -> bool {
        self.completed_videos.0.iter().any(|v| v.section == section && v.index == index)
    }
}

/// Immutable once written: a second submission never re-scores an existing
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExamResultRecord {
    pub(crate) score: f64,
    pub(crate) total_questions: i32,
    pub(crate) passed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) completed_at: OffsetDateTime,
    pub(crate) answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    pub(crate) answer: String,
}

/// Snapshot of a finished (or abandoned) attempt, taken by the retake
/// manager before the live row is reset. Never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ProgressArchive {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) course_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) snapshot: Json<serde_json::Value>,
    pub(crate) archived_at: PrimitiveDateTime,
}
