use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use time::OffsetDateTime;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::validation::validate_image_upload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Course, Progress};
use crate::db::types::SectionKind;
use crate::repositories;
use crate::schemas::progress::{
    progress_response, AdvanceVideo, ArchiveResponse, ProgressResponse, RetakeResponse,
    StartProgress, ViewCursor, ViewTarget,
};
use crate::schemas::session::{
    CaptureDirective, CaptureUploadResponse, TickRequest, TickResponse,
};
use crate::services::{gating, playback, proctoring, storage};

const CAPTURE_BODY_LIMIT_BYTES: usize = 32 * 1024 * 1024;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:course_id/progress", post(start_progress).get(get_progress))
        .route("/:course_id/progress/advance", post(advance_video))
        .route("/:course_id/progress/view", post(view_navigate))
        .route("/:course_id/progress/:user_id", axum::routing::delete(admin_reset_progress))
        .route("/:course_id/session/ticks", post(session_tick))
        .route("/:course_id/session/end", post(session_end))
        .route(
            "/:course_id/captures",
            post(upload_capture).layer(DefaultBodyLimit::max(CAPTURE_BODY_LIMIT_BYTES)),
        )
        .route("/:course_id/retake", post(full_course_retake))
        .route("/:course_id/attempts", get(list_attempts))
}

async fn load_course(state: &AppState, course_id: &str) -> Result<Course, ApiError> {
    repositories::courses::find_by_id(state.db(), course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch course"))?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))
}

async fn load_progress(
    state: &AppState,
    user_id: &str,
    course_id: &str,
) -> Result<Progress, ApiError> {
    repositories::progress::find(state.db(), user_id, course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch progress"))?
        .ok_or_else(|| ApiError::NotFound("Progress not found".to_string()))
}

/// Course start. Idempotent: an existing progress record is returned as-is
/// instead of being reset.
async fn start_progress(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    payload: Option<Json<StartProgress>>,
) -> Result<(StatusCode, Json<ProgressResponse>), ApiError> {
    let course = load_course(&state, &course_id).await?;

    if let Some(existing) = repositories::progress::find(state.db(), &user.id, &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch progress"))?
    {
        return Ok((StatusCode::OK, Json(progress_response(&course, &existing))));
    }

    let start_image_url = payload.and_then(|Json(body)| body.start_image_url);
    let progress = repositories::progress::create(
        state.db(),
        &user.id,
        &course_id,
        start_image_url.as_deref(),
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create progress"))?;

    metrics::counter!("course_starts_total").increment(1);

    Ok((StatusCode::CREATED, Json(progress_response(&course, &progress))))
}

async fn get_progress(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    let progress = load_progress(&state, &user.id, &course_id).await?;

    Ok(Json(progress_response(&course, &progress)))
}

async fn advance_video(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<AdvanceVideo>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    let progress = load_progress(&state, &user.id, &course_id).await?;

    let outcome = gating::apply_advance(&course, &progress, payload.section, payload.video_index)?;

    if !outcome.mutated {
        // Duplicate delivery or view-again traffic: answer with current
        // state, re-trigger nothing.
        return Ok(Json(progress_response(&course, &progress)));
    }

    let updated = repositories::progress::record_advance(
        state.db(),
        &user.id,
        &course_id,
        &outcome.completed_videos,
        outcome.section,
        outcome.video_index,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record advance"))?
    .ok_or_else(|| ApiError::NotFound("Progress not found".to_string()))?;

    // An advance is a state-changing boundary: keep a live session's mirror
    // aligned with the authoritative row.
    if let Some(session) = state.sessions().get(&user.id, &course_id).await {
        let mut guard = session.lock().await;
        guard.sync_position(outcome.section, outcome.video_index, 0.0);
        playback::checkpoint(&state, &mut guard).await;
    }

    metrics::counter!("video_advances_total").increment(1);
    if outcome.section_changed {
        tracing::info!(
            user_id = %user.id,
            course_id,
            section = outcome.section.as_str(),
            "Learner entered a new section"
        );
    }

    Ok(Json(progress_response(&course, &updated)))
}

/// View-again navigation. Never mutates canonical progress; it only answers
/// with the cursor the client may move to.
async fn view_navigate(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ViewTarget>,
) -> Result<Json<ViewCursor>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    let progress = load_progress(&state, &user.id, &course_id).await?;

    let video_index = match payload.section {
        SectionKind::Exam => 0,
        section => {
            let index = payload.video_index.unwrap_or(0);
            if course.video(section, index).is_none() {
                return Err(ApiError::BadRequest(
                    "Unknown section or video index for this course".to_string(),
                ));
            }
            index
        }
    };

    if !gating::is_section_accessible(&course, &progress, payload.section) {
        return Err(ApiError::BadRequest("Section is not yet accessible".to_string()));
    }

    // Pre-completion, only already-watched material and the current video
    // can be revisited.
    if !progress.is_completed
        && payload.section != SectionKind::Exam
        && !progress.has_completed(payload.section, video_index)
        && !(payload.section == progress.current_section
            && video_index == progress.current_video_index)
    {
        return Err(ApiError::BadRequest("Video has not been reached yet".to_string()));
    }

    Ok(Json(ViewCursor { section: payload.section, video_index }))
}

async fn session_tick(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<TickRequest>,
) -> Result<Json<TickResponse>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    load_progress(&state, &user.id, &course_id).await?;

    if course.video(payload.section, payload.video_index).is_none() {
        return Err(ApiError::BadRequest(
            "Unknown section or video index for this course".to_string(),
        ));
    }

    let session = playback::obtain_session(&state, &user.id, &course_id).await;
    let mut guard = session.lock().await;

    let tick = playback::TickInput {
        section: payload.section,
        video_index: payload.video_index,
        current_time: payload.current_time_seconds,
        visible: payload.visible,
        boundary: payload.boundary,
    };
    let policy = playback::SyncPolicy::from_settings(state.settings().sync());
    let outcome = guard.apply_tick(&tick, &course, &policy, OffsetDateTime::now_utc());

    if outcome.should_flush {
        playback::flush(&state, &mut guard).await;
    } else if outcome.should_checkpoint {
        playback::checkpoint(&state, &mut guard).await;
    }

    let capture = outcome.capture.map(|request| {
        metrics::counter!("captures_scheduled_total").increment(1);
        let overlay = proctoring::overlay_caption(
            &course.title,
            request.section,
            request.video_index,
            payload.current_time_seconds,
        );
        CaptureDirective::from_request(&request, overlay)
    });

    Ok(Json(TickResponse {
        capture,
        checkpointed: outcome.should_checkpoint,
        flushed: outcome.should_flush,
    }))
}

async fn session_end(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    playback::end_session(&state, &user.id, &course_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Completion of a capture directive (or a course-start photo). The frame
/// arrives as multipart form data; an upload failure is swallowed, logged,
/// and reported as `uploaded: false`, never as an error that could break
/// playback.
async fn upload_capture(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CaptureUploadResponse>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    load_progress(&state, &user.id, &course_id).await?;

    let mut kind = String::from("presence");
    let mut section: Option<SectionKind> = None;
    let mut video_index: Option<i32> = None;
    let mut elapsed_seconds: Option<f64> = None;
    let mut image: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "kind" => {
                kind = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid kind field: {e}")))?;
            }
            "section" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid section field: {e}")))?;
                section = Some(parse_section(&raw)?);
            }
            "video_index" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid video_index field: {e}")))?;
                video_index = Some(raw.parse().map_err(|_| {
                    ApiError::BadRequest(format!("Invalid video_index: {raw}"))
                })?);
            }
            "elapsed_seconds" => {
                let raw = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid elapsed_seconds field: {e}"))
                })?;
                elapsed_seconds = Some(raw.parse().map_err(|_| {
                    ApiError::BadRequest(format!("Invalid elapsed_seconds: {raw}"))
                })?);
            }
            "image" => {
                let filename = field.file_name().unwrap_or("capture.jpg").to_string();
                let content_type = field.content_type().unwrap_or("image/jpeg").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid image field: {e}")))?;
                image = Some((filename, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, content_type, bytes) =
        image.ok_or_else(|| ApiError::BadRequest("Missing image field".to_string()))?;

    validate_image_upload(
        &filename,
        &content_type,
        &state.settings().proctoring().allowed_image_extensions,
    )?;

    let max_bytes = state.settings().proctoring().max_upload_size_mb * 1024 * 1024;
    if bytes.len() as u64 > max_bytes {
        return Err(ApiError::BadRequest(format!(
            "Image exceeds the {} MB upload limit",
            state.settings().proctoring().max_upload_size_mb
        )));
    }

    match kind.as_str() {
        "start" => store_start_image(&state, &user.id, &course.id, &content_type, bytes).await,
        "presence" => {
            let section =
                section.ok_or_else(|| ApiError::BadRequest("Missing section field".to_string()))?;
            let video_index = video_index
                .ok_or_else(|| ApiError::BadRequest("Missing video_index field".to_string()))?;
            let elapsed_seconds = elapsed_seconds.unwrap_or(0.0);

            if course.video(section, video_index).is_none() {
                return Err(ApiError::BadRequest(
                    "Unknown section or video index for this course".to_string(),
                ));
            }

            store_presence_capture(
                &state,
                &user.id,
                &course.id,
                section,
                video_index,
                elapsed_seconds,
                &content_type,
                bytes,
            )
            .await
        }
        other => Err(ApiError::BadRequest(format!("Unknown capture kind: {other}"))),
    }
}

fn parse_section(raw: &str) -> Result<SectionKind, ApiError> {
    match raw {
        "theory" => Ok(SectionKind::Theory),
        "practice" => Ok(SectionKind::Practice),
        "exam" => Ok(SectionKind::Exam),
        other => Err(ApiError::BadRequest(format!("Unknown section: {other}"))),
    }
}

async fn store_start_image(
    state: &AppState,
    user_id: &str,
    course_id: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<Json<CaptureUploadResponse>, ApiError> {
    let now = OffsetDateTime::now_utc();
    let key = storage::start_image_key(user_id, course_id, now);

    let Some(stored) = try_upload(state, &key, content_type, bytes).await else {
        return Ok(Json(CaptureUploadResponse { uploaded: false, image_url: None, audit_url: None }));
    };

    repositories::progress::set_start_image(
        state.db(),
        user_id,
        course_id,
        &stored.url,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record start image"))?;

    let audit_url = presign_audit_url(state, &key).await;
    Ok(Json(CaptureUploadResponse { uploaded: true, image_url: Some(stored.url), audit_url }))
}

#[allow(clippy::too_many_arguments)]
async fn store_presence_capture(
    state: &AppState,
    user_id: &str,
    course_id: &str,
    section: SectionKind,
    video_index: i32,
    elapsed_seconds: f64,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<Json<CaptureUploadResponse>, ApiError> {
    let now = OffsetDateTime::now_utc();
    let key = storage::capture_key(user_id, course_id, section, video_index, now);
    let session = state.sessions().get(user_id, course_id).await;

    let Some(stored) = try_upload(state, &key, content_type, bytes).await else {
        settle_capture(session.as_deref(), section, video_index, now, false).await;
        metrics::counter!("captures_failed_total").increment(1);
        return Ok(Json(CaptureUploadResponse { uploaded: false, image_url: None, audit_url: None }));
    };

    let annotated = repositories::progress::annotate_capture(
        state.db(),
        user_id,
        course_id,
        &stored.url,
        section,
        video_index,
        elapsed_seconds,
        primitive_now_utc(),
    )
    .await;

    if let Err(err) = &annotated {
        tracing::error!(user_id, course_id, error = %err, "Failed to annotate capture");
    }

    match annotated {
        Ok(true) => {
            settle_capture(session.as_deref(), section, video_index, now, true).await;
            metrics::counter!("captures_completed_total").increment(1);
            tracing::info!(
                user_id,
                course_id,
                section = section.as_str(),
                video_index,
                size_bytes = stored.size,
                sha256 = %stored.sha256_hex,
                "Proof-of-presence capture stored"
            );
            let audit_url = presign_audit_url(state, &key).await;
            Ok(Json(CaptureUploadResponse {
                uploaded: true,
                image_url: Some(stored.url),
                audit_url,
            }))
        }
        Ok(false) | Err(_) => {
            settle_capture(session.as_deref(), section, video_index, now, false).await;
            metrics::counter!("captures_failed_total").increment(1);
            Ok(Json(CaptureUploadResponse { uploaded: false, image_url: None, audit_url: None }))
        }
    }
}

async fn try_upload(
    state: &AppState,
    key: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Option<storage::StoredImage> {
    let Some(service) = state.storage() else {
        tracing::warn!(key, "Object storage not configured; dropping capture");
        return None;
    };

    match service.upload_image(key, content_type, bytes).await {
        Ok(stored) => Some(stored),
        Err(err) => {
            tracing::warn!(key, error = %err, "Capture upload failed");
            None
        }
    }
}

async fn presign_audit_url(state: &AppState, key: &str) -> Option<String> {
    let service = state.storage()?;
    let expires = std::time::Duration::from_secs(
        state.settings().proctoring().capture_url_expire_minutes * 60,
    );
    match service.presign_get(key, expires).await {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(key, error = %err, "Failed to presign audit URL");
            None
        }
    }
}

async fn settle_capture(
    session: Option<&tokio::sync::Mutex<playback::LearningSession>>,
    section: SectionKind,
    video_index: i32,
    now: OffsetDateTime,
    success: bool,
) {
    let Some(session) = session else {
        return;
    };

    let mut guard = session.lock().await;
    if success {
        guard.scheduler_mut().complete(section, video_index, now);
    } else {
        guard.scheduler_mut().fail();
    }
}

async fn full_course_retake(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<RetakeResponse>, ApiError> {
    let course = load_course(&state, &course_id).await?;

    let (attempt_number, progress) = crate::services::retake::full_retake(
        state.db(),
        &user.id,
        &user.id,
        &course_id,
        primitive_now_utc(),
    )
    .await?;

    // A fresh attempt draws a fresh capture schedule.
    playback::invalidate_session(&state, &user.id, &course_id).await;

    metrics::counter!("full_retakes_total").increment(1);

    Ok(Json(RetakeResponse { attempt_number, progress: progress_response(&course, &progress) }))
}

async fn list_attempts(
    Path(course_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ArchiveResponse>>, ApiError> {
    load_course(&state, &course_id).await?;

    let archives =
        repositories::progress_archives::list_for_user_course(state.db(), &user.id, &course_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list attempts"))?;

    Ok(Json(archives.iter().map(ArchiveResponse::from_row).collect()))
}

async fn admin_reset_progress(
    Path((course_id, user_id)): Path<(String, String)>,
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let deleted = repositories::progress::delete(state.db(), &user_id, &course_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete progress"))?;

    if !deleted {
        return Err(ApiError::NotFound("Progress not found".to_string()));
    }

    playback::invalidate_session(&state, &user_id, &course_id).await;

    Ok(StatusCode::NO_CONTENT)
}
