use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{ExamResultRecord, Progress, VideoRef};
use crate::db::types::SectionKind;

pub(crate) const COLUMNS: &str = "\
    user_id, course_id, current_section, current_video_index, current_time_seconds, \
    completed_videos, is_completed, started_at, last_updated_at, start_image_url, \
    finish_image_url, last_capture_section, last_capture_video_index, \
    last_capture_time_seconds, exam_result";

pub(crate) async fn find(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Progress>, sqlx::Error> {
    sqlx::query_as::<_, Progress>(&format!(
        "SELECT {COLUMNS} FROM progress WHERE user_id = $1 AND course_id = $2"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn create(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    start_image_url: Option<&str>,
    now: PrimitiveDateTime,
) -> Result<Progress, sqlx::Error> {
    sqlx::query_as::<_, Progress>(&format!(
        "INSERT INTO progress (
            user_id, course_id, current_section, current_video_index,
            current_time_seconds, completed_videos, is_completed,
            started_at, last_updated_at, start_image_url
        ) VALUES ($1, $2, $3, 0, 0, '[]'::jsonb, FALSE, $4, $4, $5)
        RETURNING {COLUMNS}"
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(SectionKind::Theory)
    .bind(now)
    .bind(start_image_url)
    .fetch_one(pool)
    .await
}

/// Flush of the playback mirror. Only moves the row forward: a stale flush
/// (earlier section, lower video index, or lower time within the same video)
/// is skipped so a late-arriving write cannot rewind an advance that already
/// landed. Section order is the enum declaration order.
pub(crate) async fn update_position(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    section: SectionKind,
    video_index: i32,
    current_time_seconds: f64,
    now: PrimitiveDateTime,
) -> Result<Option<PrimitiveDateTime>, sqlx::Error> {
    sqlx::query_scalar::<_, PrimitiveDateTime>(
        "UPDATE progress SET
            current_section = $3,
            current_video_index = $4,
            current_time_seconds = $5,
            last_updated_at = $6
         WHERE user_id = $1 AND course_id = $2
           AND (current_section < $3
                OR (current_section = $3
                    AND (current_video_index < $4
                         OR (current_video_index = $4 AND current_time_seconds <= $5))))
         RETURNING last_updated_at",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(section)
    .bind(video_index)
    .bind(current_time_seconds)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn record_advance(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    completed_videos: &[VideoRef],
    section: SectionKind,
    video_index: i32,
    now: PrimitiveDateTime,
) -> Result<Option<Progress>, sqlx::Error> {
    sqlx::query_as::<_, Progress>(&format!(
        "UPDATE progress SET
            completed_videos = $3,
            current_section = $4,
            current_video_index = $5,
            current_time_seconds = 0,
            last_updated_at = $6
         WHERE user_id = $1 AND course_id = $2
         RETURNING {COLUMNS}"
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(Json(completed_videos))
    .bind(section)
    .bind(video_index)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn record_exam_result(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    result: &ExamResultRecord,
    is_completed: bool,
    now: PrimitiveDateTime,
) -> Result<Option<Progress>, sqlx::Error> {
    sqlx::query_as::<_, Progress>(&format!(
        "UPDATE progress SET
            exam_result = $3,
            is_completed = $4,
            last_updated_at = $5
         WHERE user_id = $1 AND course_id = $2
         RETURNING {COLUMNS}"
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(Json(result))
    .bind(is_completed)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Proof-of-presence annotation. Touches only the capture fields, so it
/// commutes with a concurrent position flush.
pub(crate) async fn annotate_capture(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    image_url: &str,
    section: SectionKind,
    video_index: i32,
    elapsed_seconds: f64,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE progress SET
            finish_image_url = $3,
            last_capture_section = $4,
            last_capture_video_index = $5,
            last_capture_time_seconds = $6,
            last_updated_at = $7
         WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(image_url)
    .bind(section)
    .bind(video_index)
    .bind(elapsed_seconds)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_start_image(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
    image_url: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE progress SET start_image_url = $3, last_updated_at = $4
         WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(image_url)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Administrative reset only; learner-driven flows archive instead.
pub(crate) async fn delete(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM progress WHERE user_id = $1 AND course_id = $2")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
