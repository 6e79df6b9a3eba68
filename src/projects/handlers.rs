use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{auth::extractors::AuthUser, state::AppState};

use super::dto::{
    validate_fields, CreateProjectRequest, Pagination, ProjectResponse, UpdateProjectRequest,
};
use super::repo::Project;

pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route(
            "/projects/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %e, "project storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something went wrong".into(),
    )
}

#[instrument(skip(state, payload))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), (StatusCode, String)> {
    validate_fields(
        &payload.name,
        payload.progress,
        payload.start_date,
        payload.end_date,
    )
    .map_err(|msg| (StatusCode::BAD_REQUEST, msg.to_string()))?;

    let project = Project::create(&state.db, user_id, &payload)
        .await
        .map_err(internal)?;

    info!(project_id = %project.id, %user_id, "project created");
    Ok((StatusCode::CREATED, Json(ProjectResponse::from(project))))
}

#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<ProjectResponse>>, (StatusCode, String)> {
    let projects = Project::list_by_user(&state.db, user_id, p.limit, p.offset)
        .await
        .map_err(internal)?;
    Ok(Json(
        projects.into_iter().map(ProjectResponse::from).collect(),
    ))
}

#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectResponse>, (StatusCode, String)> {
    let project = Project::find_by_id(&state.db, id, user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Project not found".into()))?;
    Ok(Json(ProjectResponse::from(project)))
}

#[instrument(skip(state, payload))]
pub async fn update_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, (StatusCode, String)> {
    let mut project = Project::find_by_id(&state.db, id, user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Project not found".into()))?;

    if let Some(name) = payload.name {
        project.name = name;
    }
    if let Some(description) = payload.description {
        project.description = description;
    }
    if let Some(status) = payload.status {
        project.status = status.as_str().to_string();
    }
    if let Some(progress) = payload.progress {
        project.progress = progress;
    }
    if let Some(start_date) = payload.start_date {
        project.start_date = start_date;
    }
    if let Some(end_date) = payload.end_date {
        project.end_date = Some(end_date);
    }
    if let Some(tasks) = payload.tasks {
        project.tasks.0 = tasks;
    }
    if let Some(documents) = payload.documents {
        project.documents.0 = documents;
    }

    validate_fields(
        &project.name,
        project.progress,
        project.start_date,
        project.end_date,
    )
    .map_err(|msg| (StatusCode::BAD_REQUEST, msg.to_string()))?;

    let saved = project.save(&state.db).await.map_err(internal)?;
    info!(project_id = %saved.id, %user_id, "project updated");
    Ok(Json(ProjectResponse::from(saved)))
}

#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = Project::delete(&state.db, id, user_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Project not found".into()));
    }
    info!(project_id = %id, %user_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}
