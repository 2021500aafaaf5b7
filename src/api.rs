use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::{ErrorKind, LibError};
use crate::interpreter::Interpreter;
use crate::models::{
    ChatPayload, CreateGraphPayload, Edge, GraphId, PidGraph, UpdateDescriptionPayload,
    UpdateGraphPayload, UserId,
};
use crate::operations::GraphOperations;
use crate::reconcile::Reconciler;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotFoundOrForbidden => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::InterpreterUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::InterpreterOutputUnparseable => StatusCode::BAD_GATEWAY,
            ErrorKind::EmptyResult => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::IntegrityConflict => StatusCode::CONFLICT,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "graph api request failed");
        (status, self.0.public).into_response()
    }
}

/// Authenticated caller identity, placed into request extensions by the
/// host application's auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentUser>().copied().ok_or_else(|| {
            (StatusCode::UNAUTHORIZED, "Missing authenticated user").into_response()
        })
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::SqlitePool>;
}

pub trait GraphApp: HasPool {
    fn interpreter(&self) -> Arc<dyn Interpreter>;

    fn debug_dir(&self) -> Option<PathBuf> {
        None
    }
}

fn operations<S: GraphApp>(app: &S) -> GraphOperations {
    GraphOperations::new(
        app.pool(),
        Reconciler::new(app.interpreter(), app.debug_dir()),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    graph: PidGraph,
    #[serde(skip_serializing_if = "String::is_empty")]
    assistant_note: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParsedGraphResponse {
    nodes: Vec<String>,
    edges: Vec<Edge>,
    #[serde(skip_serializing_if = "String::is_empty")]
    assistant_note: String,
}

async fn create_graph_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Json(payload): Json<CreateGraphPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let graph = operations(&app).create_graph(actor, payload).await?;
    Ok((StatusCode::CREATED, Json(graph)))
}

async fn list_graphs_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let items = operations(&app).list_graphs(actor).await?;
    Ok(Json(items))
}

async fn get_graph_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let graph = operations(&app).get_graph(actor, graph_id).await?;
    Ok(Json(graph))
}

async fn replace_graph_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
    Json(payload): Json<UpdateGraphPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let graph = operations(&app)
        .replace_graph(actor, graph_id, payload)
        .await?;
    Ok(Json(graph))
}

async fn delete_graph_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    operations(&app).delete_graph(actor, graph_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let outcome = operations(&app)
        .chat(actor, graph_id, &payload.instruction)
        .await?;
    Ok(Json(ChatResponse {
        graph: outcome.graph,
        assistant_note: outcome.assistant_note,
    }))
}

async fn parse_handler<S>(
    State(app): State<S>,
    CurrentUser(_actor): CurrentUser,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let parsed = operations(&app)
        .parse_instruction(&payload.instruction)
        .await?;
    Ok(Json(ParsedGraphResponse {
        nodes: parsed.nodes,
        edges: parsed.edges,
        assistant_note: parsed.assistant_note,
    }))
}

async fn update_description_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
    Json(payload): Json<UpdateDescriptionPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    operations(&app)
        .update_description(actor, graph_id, &payload.instruction)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_versions_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path(graph_id): Path<GraphId>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let items = operations(&app).list_versions(actor, graph_id).await?;
    Ok(Json(items))
}

async fn get_version_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path((graph_id, version_number)): Path<(GraphId, i64)>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let snapshot = operations(&app)
        .get_version(actor, graph_id, version_number)
        .await?;
    Ok(Json(snapshot))
}

async fn restore_version_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path((graph_id, version_number)): Path<(GraphId, i64)>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let graph = operations(&app)
        .restore_version(actor, graph_id, version_number)
        .await?;
    Ok(Json(graph))
}

async fn rename_version_handler<S>(
    State(app): State<S>,
    CurrentUser(actor): CurrentUser,
    Path((graph_id, version_number)): Path<(GraphId, i64)>,
    Json(payload): Json<UpdateDescriptionPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    operations(&app)
        .rename_version_description(actor, graph_id, version_number, &payload.instruction)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes<S>() -> Router<S>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /parse [POST]");
    tracing::info!("Registering route /graph [GET,POST]");
    tracing::info!("Registering route /graph/{{graph_id}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /graph/{{graph_id}}/chat [POST]");
    tracing::info!("Registering route /graph/{{graph_id}}/description [PATCH]");
    tracing::info!("Registering route /graph/{{graph_id}}/versions [GET]");
    tracing::info!("Registering route /graph/{{graph_id}}/versions/{{version_number}} [GET,PATCH(/description),POST(/restore)]");

    Router::new()
        .route("/parse", post(parse_handler::<S>))
        .route(
            "/graph",
            get(list_graphs_handler::<S>).post(create_graph_handler::<S>),
        )
        .route(
            "/graph/{graph_id}",
            get(get_graph_handler::<S>)
                .put(replace_graph_handler::<S>)
                .delete(delete_graph_handler::<S>),
        )
        .route("/graph/{graph_id}/chat", post(chat_handler::<S>))
        .route(
            "/graph/{graph_id}/description",
            axum::routing::patch(update_description_handler::<S>),
        )
        .route(
            "/graph/{graph_id}/versions",
            get(list_versions_handler::<S>),
        )
        .route(
            "/graph/{graph_id}/versions/{version_number}",
            get(get_version_handler::<S>),
        )
        .route(
            "/graph/{graph_id}/versions/{version_number}/restore",
            post(restore_version_handler::<S>),
        )
        .route(
            "/graph/{graph_id}/versions/{version_number}/description",
            axum::routing::patch(rename_version_handler::<S>),
        )
}
