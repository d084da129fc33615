//! Exam-only and full-course retakes. The full retake is one logical unit of
//! work: archive and reset commit together or not at all.

use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::Progress;
use crate::db::types::SectionKind;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum RetakeError {
    #[error("progress not found")]
    NotFound,
    #[error("actor does not own this progress record")]
    NotOwner,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("failed to encode archive snapshot")]
    Snapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Clears the failed exam result and puts the learner back at the exam.
/// Video history stays; a failed attempt is not archived.
pub(crate) async fn exam_retake(
    pool: &PgPool,
    actor_id: &str,
    user_id: &str,
    course_id: &str,
    now: PrimitiveDateTime,
) -> Result<Progress, RetakeError> {
    if actor_id != user_id {
        return Err(RetakeError::NotOwner);
    }

    let progress = repositories::progress::find(pool, user_id, course_id)
        .await?
        .ok_or(RetakeError::NotFound)?;

    match &progress.exam_result {
        None => return Err(RetakeError::Conflict("no exam result to retake")),
        Some(result) if result.0.passed => {
            return Err(RetakeError::Conflict(
                "a passed exam cannot be retaken; use a full course retake",
            ))
        }
        Some(_) => {}
    }

    let updated = sqlx::query_as::<_, Progress>(&format!(
        "UPDATE progress SET
            exam_result = NULL,
            is_completed = FALSE,
            current_section = $3,
            last_updated_at = $4
         WHERE user_id = $1 AND course_id = $2
         RETURNING {}",
        repositories::progress::COLUMNS,
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(SectionKind::Exam)
    .bind(now)
    .fetch_optional(pool)
    .await?
    .ok_or(RetakeError::NotFound)?;

    Ok(updated)
}

/// Archives the whole progress record under the next attempt number, then
/// resets the live row to the initial theory state, inside one transaction.
pub(crate) async fn full_retake(
    pool: &PgPool,
    actor_id: &str,
    user_id: &str,
    course_id: &str,
    now: PrimitiveDateTime,
) -> Result<(i32, Progress), RetakeError> {
    if actor_id != user_id {
        return Err(RetakeError::NotOwner);
    }

    let mut tx = pool.begin().await?;

    let progress = sqlx::query_as::<_, Progress>(&format!(
        "SELECT {} FROM progress WHERE user_id = $1 AND course_id = $2 FOR UPDATE",
        repositories::progress::COLUMNS,
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(RetakeError::NotFound)?;

    if !progress.is_completed {
        return Err(RetakeError::Conflict("only a completed course can be fully retaken"));
    }

    let attempt_number: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(attempt_number), 0) + 1 FROM progress_archives
         WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&mut *tx)
    .await?;

    let snapshot = serde_json::to_value(&progress)?;

    sqlx::query(
        "INSERT INTO progress_archives (id, user_id, course_id, attempt_number, snapshot, archived_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(course_id)
    .bind(attempt_number)
    .bind(Json(snapshot))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let reset = sqlx::query_as::<_, Progress>(&format!(
        "UPDATE progress SET
            current_section = $3,
            current_video_index = 0,
            current_time_seconds = 0,
            completed_videos = '[]'::jsonb,
            is_completed = FALSE,
            exam_result = NULL,
            start_image_url = NULL,
            finish_image_url = NULL,
            last_capture_section = NULL,
            last_capture_video_index = NULL,
            last_capture_time_seconds = NULL,
            started_at = $4,
            last_updated_at = $4
         WHERE user_id = $1 AND course_id = $2
         RETURNING {}",
        repositories::progress::COLUMNS,
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(SectionKind::Theory)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((attempt_number, reset))
}
