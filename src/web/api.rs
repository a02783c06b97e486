use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivitySnapshot;
use crate::db::models::UploadedFile;
use crate::error::AppError;
use crate::ingest::pipeline::{PipelineError, ProcessingResult};
use crate::policy::{Actor, Capability, Role};
use crate::state::AppState;
use crate::web::identity::{enforce_rate_limit, require};

// ---------------------------------------------------------------------------
// POST /api/uploads
// ---------------------------------------------------------------------------

pub async fn upload(
    State(state): State<AppState>,
    actor: Actor,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedFile>), AppError> {
    enforce_rate_limit(&state, &actor, "upload").await?;
    require(&state, &actor, Capability::Upload)?;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut series_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                file = Some((filename, bytes.to_vec()));
            }
            "series_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                let text = text.trim();
                if !text.is_empty() {
                    series_id = Some(
                        text.parse()
                            .map_err(|_| AppError::BadRequest("invalid series_id".into()))?,
                    );
                }
            }
            _ => {}
        }
    }

    let (filename, data) = match file {
        Some(f) if !f.0.is_empty() => f,
        _ => return Err(AppError::BadRequest("no file provided".into())),
    };

    let record = state
        .ingestor
        .accept_upload(&actor, &filename, &data, series_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ---------------------------------------------------------------------------
// GET /api/files/{id}
// ---------------------------------------------------------------------------

pub async fn get_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(file_id): Path<i64>,
) -> Result<Json<UploadedFile>, AppError> {
    enforce_rate_limit(&state, &actor, "file_status").await?;

    let privileged = matches!(actor.role, Role::Moderator | Role::Admin);
    match state.ingestor.get_file(file_id).await? {
        Some(file) if privileged || file.user_id == actor.user_id => Ok(Json(file)),
        _ => Err(AppError::NotFound(format!("file {file_id}"))),
    }
}

// ---------------------------------------------------------------------------
// DELETE /api/files/{id}
// ---------------------------------------------------------------------------

pub async fn delete_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(file_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    enforce_rate_limit(&state, &actor, "delete").await?;
    require(&state, &actor, Capability::DeleteUpload)?;

    state.ingestor.remove_upload(&actor, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/files/{id}/process
// ---------------------------------------------------------------------------

pub async fn process_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(file_id): Path<i64>,
) -> Result<Json<ProcessingResult>, AppError> {
    enforce_rate_limit(&state, &actor, "process").await?;
    require(&state, &actor, Capability::ProcessNow)?;

    let cancel = CancellationToken::new();
    let outcome = state.ingestor.process_now(&actor, file_id, &cancel).await;
    match outcome {
        Err(e @ (PipelineError::NotFound(_) | PipelineError::AlreadyProcessed { .. })) => {
            Err(e.into())
        }
        other => Ok(Json(ProcessingResult::from_outcome(&other))),
    }
}

// ---------------------------------------------------------------------------
// GET /api/activity
// ---------------------------------------------------------------------------

pub async fn activity(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<ActivitySnapshot>, AppError> {
    enforce_rate_limit(&state, &actor, "activity").await?;
    require(&state, &actor, Capability::ViewActivity)?;
    Ok(Json(state.ingestor.activity().snapshot()))
}
