use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::pagination::PaginatedResponse;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::course::{course_response, CourseResponse, CourseUpsert};

#[derive(Debug, Deserialize)]
pub(crate) struct ListCoursesQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "crate::api::pagination::default_limit")]
    limit: i64,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upsert_course).get(list_courses))
        .route("/:course_id", get(get_course))
}

/// Admin escape hatch for loading course definitions; authoring workflows
/// proper live outside this service.
async fn upsert_course(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<CourseUpsert>,
) -> Result<(axum::http::StatusCode, Json<CourseResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (id, title, theory, practice, exam) = payload.into_defs();

    let course = repositories::courses::upsert(
        state.db(),
        repositories::courses::UpsertCourse {
            id: &id,
            title: &title,
            theory,
            practice,
            exam,
            now: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to store course"))?;

    let default_pass = state.settings().training().default_pass_score_percent;
    Ok((axum::http::StatusCode::CREATED, Json(course_response(&course, default_pass))))
}

async fn list_courses(
    CurrentUser(_user): CurrentUser,
    State(state): State<AppState>,
    Query(params): Query<ListCoursesQuery>,
) -> Result<Json<PaginatedResponse<CourseResponse>>, ApiError> {
    let skip = params.skip.max(0);
    let limit = params.limit.clamp(1, 1000);

    let courses = repositories::courses::list(state.db(), skip, limit)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list courses"))?;
    let total_count = repositories::courses::count(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count courses"))?;

    let default_pass = state.settings().training().default_pass_score_percent;
    let items =
        courses.iter().map(|course| course_response(course, default_pass)).collect();

    Ok(Json(PaginatedResponse { items, total_count, skip, limit }))
}

async fn get_course(
    Path(course_id): Path<String>,
    CurrentUser(_user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course = repositories::courses::find_by_id(state.db(), &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch course"))?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let default_pass = state.settings().training().default_pass_score_percent;
    Ok(Json(course_response(&course, default_pass)))
}
