use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::{ExamResultRecord, SubmittedAnswer};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerSubmit {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    pub(crate) answer: String,
}

/// The client-observable submission contract: `{groupId, answers}`. Missing
/// answers are allowed and score as incorrect.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamSubmission {
    #[serde(alias = "groupId")]
    #[validate(length(min = 1, message = "group_id must not be empty"))]
    pub(crate) group_id: String,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) answers: Vec<AnswerSubmit>,
}

impl ExamSubmission {
    pub(crate) fn into_answers(self) -> Vec<SubmittedAnswer> {
        self.answers
            .into_iter()
            .map(|answer| SubmittedAnswer { question_id: answer.question_id, answer: answer.answer })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResultResponse {
    pub(crate) score: f64,
    pub(crate) total_questions: i32,
    pub(crate) passed: bool,
    pub(crate) completed_at: String,
}

impl ExamResultResponse {
    pub(crate) fn from_record(record: &ExamResultRecord) -> Self {
        Self {
            score: record.score,
            total_questions: record.total_questions,
            passed: record.passed,
            completed_at: format_offset(record.completed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_accepts_camel_case_aliases() {
        let submission: ExamSubmission = serde_json::from_value(serde_json::json!({
            "groupId": "forklift-101",
            "answers": [{"questionId": "q1", "answer": "a"}]
        }))
        .expect("deserialize");

        assert_eq!(submission.group_id, "forklift-101");
        let answers = submission.into_answers();
        assert_eq!(answers[0].question_id, "q1");
        assert_eq!(answers[0].answer, "a");
    }

    #[test]
    fn submission_answers_default_to_empty() {
        let submission: ExamSubmission =
            serde_json::from_value(serde_json::json!({"group_id": "g"})).expect("deserialize");
        assert!(submission.answers.is_empty());
    }
}
