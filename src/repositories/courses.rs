use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Course, ExamDef, SectionDef};

pub(crate) const COLUMNS: &str =
    "id, title, theory, practice, exam, created_at, updated_at";

pub(crate) struct UpsertCourse<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) theory: SectionDef,
    pub(crate) practice: SectionDef,
    pub(crate) exam: ExamDef,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!("SELECT {COLUMNS} FROM courses WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list(
    pool: &PgPool,
    skip: i64,
    limit: i64,
) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!(
        "SELECT {COLUMNS} FROM courses ORDER BY created_at DESC OFFSET $1 LIMIT $2"
    ))
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM courses").fetch_one(pool).await
}

pub(crate) async fn upsert(
    pool: &PgPool,
    params: UpsertCourse<'_>,
) -> Result<Course, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!(
        "INSERT INTO courses (id, title, theory, practice, exam, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         ON CONFLICT (id) DO UPDATE SET
             title = EXCLUDED.title,
             theory = EXCLUDED.theory,
             practice = EXCLUDED.practice,
             exam = EXCLUDED.exam,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.title)
    .bind(Json(params.theory))
    .bind(Json(params.practice))
    .bind(Json(params.exam))
    .bind(params.now)
    .fetch_one(pool)
    .await
}
