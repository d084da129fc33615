use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use time::OffsetDateTime;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ExamResultRecord;
use crate::db::types::SectionKind;
use crate::repositories;
use crate::schemas::course::{exam_payload, ExamPayload};
use crate::schemas::exam::{ExamResultResponse, ExamSubmission};
use crate::schemas::progress::{progress_response, ProgressResponse};
use crate::services::{gating, playback, scoring};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:course_id/exam", get(get_exam))
        .route("/:course_id/exam/submissions", post(submit_exam))
        .route("/:course_id/exam/retake", post(exam_retake))
}

/// Learner-facing question payload; correct answers are stripped before the
/// response leaves the server.
async fn get_exam(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamPayload>, ApiError> {
    let course = repositories::courses::find_by_id(state.db(), &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch course"))?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let progress = repositories::progress::find(state.db(), &user.id, &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch progress"))?
        .ok_or_else(|| ApiError::NotFound("Progress not found".to_string()))?;

    if !gating::is_section_accessible(&course, &progress, SectionKind::Exam) {
        return Err(ApiError::Forbidden("Exam is not yet accessible"));
    }

    if course.exam.0.questions.is_empty() {
        return Err(ApiError::Conflict("Exam has no questions".to_string()));
    }

    let default_pass = state.settings().training().default_pass_score_percent;
    Ok(Json(exam_payload(&course, default_pass)))
}

async fn submit_exam(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ExamSubmission>,
) -> Result<Json<ExamResultResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let course = repositories::courses::find_by_id(state.db(), &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch course"))?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let progress = repositories::progress::find(state.db(), &user.id, &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch progress"))?
        .ok_or_else(|| ApiError::NotFound("Progress not found".to_string()))?;

    if payload.group_id != course.exam.0.group_id {
        return Err(ApiError::BadRequest(format!(
            "Unknown exam group: {}",
            payload.group_id
        )));
    }

    if course.exam.0.questions.is_empty() {
        return Err(ApiError::Conflict("Exam has no questions".to_string()));
    }

    // Server-side gating re-check; client-asserted state is not trusted.
    if !gating::is_section_accessible(&course, &progress, SectionKind::Exam) {
        return Err(ApiError::Forbidden("Exam is not yet accessible"));
    }

    // A written result is immutable: no silent re-scoring. The learner goes
    // through the retake flow instead.
    if progress.exam_result.is_some() {
        return Err(ApiError::Conflict(
            "Exam already scored; use retake to attempt again".to_string(),
        ));
    }

    let answers = payload.into_answers();
    let pass_score = course
        .exam
        .0
        .pass_score_percent
        .unwrap_or(state.settings().training().default_pass_score_percent);
    let score = scoring::score_exam(&course.exam.0.questions, &answers, pass_score);

    let record = ExamResultRecord {
        score: score.score_percent,
        total_questions: score.total_questions,
        passed: score.passed,
        completed_at: OffsetDateTime::now_utc(),
        answers,
    };

    repositories::progress::record_exam_result(
        state.db(),
        &user.id,
        &course_id,
        &record,
        score.passed,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record exam result"))?
    .ok_or_else(|| ApiError::NotFound("Progress not found".to_string()))?;

    metrics::counter!(
        "exam_submissions_total",
        "passed" => if score.passed { "true" } else { "false" }
    )
    .increment(1);
    tracing::info!(
        user_id = %user.id,
        course_id,
        correct = score.correct_count,
        total = score.total_questions,
        passed = score.passed,
        "Exam submission scored"
    );

    if score.passed {
        // Course complete: flush and retire the learning session.
        playback::end_session(&state, &user.id, &course_id).await;
    }

    Ok(Json(ExamResultResponse::from_record(&record)))
}

/// Exam-only retake: requires a failed result, keeps video history.
async fn exam_retake(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let course = repositories::courses::find_by_id(state.db(), &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch course"))?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let progress = crate::services::retake::exam_retake(
        state.db(),
        &user.id,
        &user.id,
        &course_id,
        primitive_now_utc(),
    )
    .await?;

    metrics::counter!("exam_retakes_total").increment(1);

    Ok(Json(progress_response(&course, &progress)))
}
