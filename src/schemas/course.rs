use serde::{Deserialize, Serialize};
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::{AnswerOption, Course, ExamDef, QuestionDef, SectionDef, VideoDef};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct VideoCreate {
    #[validate(length(min = 1, message = "video id must not be empty"))]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "video title must not be empty"))]
    pub(crate) title: String,
    pub(crate) url: String,
    #[serde(alias = "lengthSeconds")]
    #[validate(range(exclusive_min = 0.0, message = "length_seconds must be positive"))]
    pub(crate) length_seconds: f64,
    #[serde(default = "default_true", alias = "canSeek")]
    pub(crate) can_seek: bool,
    #[serde(default = "default_true", alias = "shouldCompleteToPassed")]
    pub(crate) complete_to_pass: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct SectionCreate {
    #[serde(default)]
    #[validate(nested)]
    pub(crate) videos: Vec<VideoCreate>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub(crate) struct OptionCreate {
    #[validate(length(min = 1, message = "option id must not be empty"))]
    pub(crate) id: String,
    pub(crate) content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[validate(length(min = 1, message = "question id must not be empty"))]
    pub(crate) id: String,
    pub(crate) content: String,
    #[validate(length(min = 2, message = "a question needs at least two options"), nested)]
    pub(crate) options: Vec<OptionCreate>,
    #[serde(alias = "correctOptionId")]
    #[validate(length(min = 1, message = "correct_option_id must not be empty"))]
    pub(crate) correct_option_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[serde(default, alias = "groupId")]
    pub(crate) group_id: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
    #[serde(alias = "timeLimitSeconds")]
    #[validate(range(min = 1, message = "time_limit_seconds must be positive"))]
    pub(crate) time_limit_seconds: i64,
    #[serde(default, alias = "passScorePercent")]
    #[validate(range(min = 0.0, max = 100.0, message = "pass_score_percent must be a percentage"))]
    pub(crate) pass_score_percent: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CourseUpsert {
    #[validate(length(min = 1, message = "id must not be empty"))]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) theory: SectionCreate,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) practice: SectionCreate,
    #[validate(nested)]
    pub(crate) exam: ExamCreate,
}

impl CourseUpsert {
    pub(crate) fn into_defs(self) -> (String, String, SectionDef, SectionDef, ExamDef) {
        let course_id = self.id;
        let group_id = self.exam.group_id.unwrap_or_else(|| course_id.clone());

        let exam = ExamDef {
            group_id,
            questions: self
                .exam
                .questions
                .into_iter()
                .map(|question| QuestionDef {
                    id: question.id,
                    content: question.content,
                    options: question
                        .options
                        .into_iter()
                        .map(|option| AnswerOption { id: option.id, content: option.content })
                        .collect(),
                    correct_option_id: question.correct_option_id,
                })
                .collect(),
            time_limit_seconds: self.exam.time_limit_seconds,
            pass_score_percent: self.exam.pass_score_percent,
        };

        (
            course_id,
            self.title,
            section_def(self.theory),
            section_def(self.practice),
            exam,
        )
    }
}

fn section_def(section: SectionCreate) -> SectionDef {
    SectionDef {
        videos: section
            .videos
            .into_iter()
            .map(|video| VideoDef {
                id: video.id,
                title: video.title,
                url: video.url,
                length_seconds: video.length_seconds,
                can_seek: video.can_seek,
                complete_to_pass: video.complete_to_pass,
            })
            .collect(),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub(crate) struct VideoPayload {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) length_seconds: f64,
    pub(crate) can_seek: bool,
    pub(crate) complete_to_pass: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SectionPayload {
    pub(crate) videos: Vec<VideoPayload>,
}

/// Course-level exam metadata. Question content is served only by the gated
/// exam endpoint, and always through `QuestionPayload`.
#[derive(Debug, Serialize)]
pub(crate) struct ExamSummaryPayload {
    pub(crate) group_id: String,
    pub(crate) question_count: usize,
    pub(crate) time_limit_seconds: i64,
    pub(crate) pass_score_percent: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CourseResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) theory: SectionPayload,
    pub(crate) practice: SectionPayload,
    pub(crate) exam: ExamSummaryPayload,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct OptionPayload {
    pub(crate) id: String,
    pub(crate) content: String,
}

/// Learner-facing question: the correct-answer field does not exist on this
/// type, so it cannot leak by accident.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionPayload {
    pub(crate) id: String,
    pub(crate) content: String,
    pub(crate) options: Vec<OptionPayload>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamPayload {
    pub(crate) group_id: String,
    pub(crate) time_limit_seconds: i64,
    pub(crate) pass_score_percent: f64,
    pub(crate) questions: Vec<QuestionPayload>,
}

impl QuestionPayload {
    pub(crate) fn from_def(question: &QuestionDef) -> Self {
        Self {
            id: question.id.clone(),
            content: question.content.clone(),
            options: question
                .options
                .iter()
                .map(|option| OptionPayload { id: option.id.clone(), content: option.content.clone() })
                .collect(),
        }
    }
}

fn section_payload(section: &SectionDef) -> SectionPayload {
    SectionPayload {
        videos: section
            .videos
            .iter()
            .map(|video| VideoPayload {
                id: video.id.clone(),
                title: video.title.clone(),
                url: video.url.clone(),
                length_seconds: video.length_seconds,
                can_seek: video.can_seek,
                complete_to_pass: video.complete_to_pass,
            })
            .collect(),
    }
}

pub(crate) fn course_response(course: &Course, default_pass_score: f64) -> CourseResponse {
    CourseResponse {
        id: course.id.clone(),
        title: course.title.clone(),
        theory: section_payload(&course.theory.0),
        practice: section_payload(&course.practice.0),
        exam: ExamSummaryPayload {
            group_id: course.exam.0.group_id.clone(),
            question_count: course.exam.0.questions.len(),
            time_limit_seconds: course.exam.0.time_limit_seconds,
            pass_score_percent: course.exam.0.pass_score_percent.unwrap_or(default_pass_score),
        },
        created_at: format_primitive(course.created_at),
        updated_at: format_primitive(course.updated_at),
    }
}

pub(crate) fn exam_payload(course: &Course, default_pass_score: f64) -> ExamPayload {
    let exam = &course.exam.0;
    ExamPayload {
        group_id: exam.group_id.clone(),
        time_limit_seconds: exam.time_limit_seconds,
        pass_score_percent: exam.pass_score_percent.unwrap_or(default_pass_score),
        questions: exam.questions.iter().map(QuestionPayload::from_def).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    #[test]
    fn exam_payload_never_contains_correct_option_ids() {
        let course = fixtures::course_with_videos(1, 1);
        let payload = exam_payload(&course, 70.0);

        let json = serde_json::to_value(&payload).expect("payload json");
        let questions = json["questions"].as_array().unwrap();
        assert_eq!(questions.len(), course.exam.0.questions.len());
        for question in questions {
            assert!(question.get("correct_option_id").is_none());
            assert!(question.get("correctOptionId").is_none());
            for option in question["options"].as_array().unwrap() {
                let mut keys: Vec<_> = option.as_object().unwrap().keys().cloned().collect();
                keys.sort();
                assert_eq!(keys, vec!["content".to_string(), "id".to_string()]);
            }
        }
    }

    #[test]
    fn course_response_resolves_default_pass_score() {
        let mut course = fixtures::course_with_videos(1, 1);
        course.exam.0.pass_score_percent = None;

        let response = course_response(&course, 70.0);
        assert_eq!(response.exam.pass_score_percent, 70.0);
        assert_eq!(response.exam.question_count, course.exam.0.questions.len());
    }

    #[test]
    fn upsert_defaults_group_id_to_course_id() {
        let payload: CourseUpsert = serde_json::from_value(serde_json::json!({
            "id": "forklift-101",
            "title": "Forklift Safety",
            "theory": {"videos": []},
            "practice": {"videos": []},
            "exam": {"timeLimitSeconds": 600, "questions": []}
        }))
        .expect("deserialize");

        let (id, _, _, _, exam) = payload.into_defs();
        assert_eq!(id, "forklift-101");
        assert_eq!(exam.group_id, "forklift-101");
    }
}
