use sqlx::PgPool;

use crate::db::models::ProgressArchive;

pub(crate) const COLUMNS: &str =
    "id, user_id, course_id, attempt_number, snapshot, archived_at";

pub(crate) async fn list_for_user_course(
    pool: &PgPool,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<ProgressArchive>, sqlx::Error> {
    sqlx::query_as::<_, ProgressArchive>(&format!(
        "SELECT {COLUMNS} FROM progress_archives
         WHERE user_id = $1 AND course_id = $2
         ORDER BY attempt_number"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_all(pool)
    .await
}
