use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use pidsketch::api::{CurrentUser, GraphApp, HasPool};
use pidsketch::error::Result as PidResult;
use pidsketch::interpreter::{Interpreter, InterpreterReply, InterpreterRequest};
use pidsketch::models::UserId;

#[derive(Clone)]
struct DevAuthConfig {
    default_user_id: UserId,
    require_dev_header: bool,
}

#[derive(Clone)]
struct DemoApp {
    pool: Arc<SqlitePool>,
    interpreter: Arc<dyn Interpreter>,
    debug_dir: Option<PathBuf>,
    auth: DevAuthConfig,
}

impl HasPool for DemoApp {
    fn pool(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.pool)
    }
}

impl GraphApp for DemoApp {
    fn interpreter(&self) -> Arc<dyn Interpreter> {
        Arc::clone(&self.interpreter)
    }

    fn debug_dir(&self) -> Option<PathBuf> {
        self.debug_dir.clone()
    }
}

/// Offline stand-in for the real language service. Reads instructions of
/// the form "Pump -> Filter, Filter -> Tank" and chains them into a graph,
/// merging with whatever node/edge lists the edit prompt embedded.
struct ArrowInterpreter;

#[async_trait]
impl Interpreter for ArrowInterpreter {
    fn name(&self) -> &str {
        "arrow-demo"
    }

    async fn interpret(&self, request: InterpreterRequest) -> PidResult<InterpreterReply> {
        let instruction = request
            .prompt
            .rsplit("Instruction:")
            .next()
            .unwrap_or(&request.prompt);
        let instruction = instruction
            .rsplit("Description:")
            .next()
            .unwrap_or(instruction);

        // Start from the prior graph the edit prompt embedded, if any.
        let mut nodes: Vec<String> = Vec::new();
        let mut edges: Vec<[String; 2]> = Vec::new();
        for line in request.prompt.lines() {
            if let Some(prior) = line.strip_prefix("Nodes: ") {
                nodes = serde_json::from_str(prior.trim()).unwrap_or_default();
            } else if let Some(prior) = line.strip_prefix("Edges: ") {
                edges = serde_json::from_str(prior.trim()).unwrap_or_default();
            }
        }
        for clause in instruction.split([',', ';', '\n']) {
            if !clause.contains("->") {
                continue;
            }
            let mut hops = clause
                .split("->")
                .map(str::trim)
                .filter(|hop| !hop.is_empty());
            let Some(mut from) = hops.next().map(str::to_string) else {
                continue;
            };
            if !nodes.contains(&from) {
                nodes.push(from.clone());
            }
            for to in hops {
                let to = to.to_string();
                if !nodes.contains(&to) {
                    nodes.push(to.clone());
                }
                edges.push([from.clone(), to.clone()]);
                from = to;
            }
        }

        Ok(InterpreterReply::Structured(json!({
            "nodes": nodes,
            "edges": edges,
            "assistant": "Parsed with the offline arrow demo interpreter."
        })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pidsketch::config::init_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let bind = env::var("CHAT_DEMO_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid CHAT_DEMO_BIND '{}'", bind))?;

    // A single connection keeps the in-memory default database alive and
    // shared across requests.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to sqlite")?;

    pidsketch::db::create_tables(&pool)
        .await
        .context("failed to run migrations")?;

    let default_user_id = pidsketch::users::create_user(&pool, "chat-demo", "!demo-login-disabled")
        .await
        .context("failed to create demo user")?
        .context("demo username already taken")?;

    let app_state = DemoApp {
        pool: Arc::new(pool),
        interpreter: Arc::new(ArrowInterpreter),
        debug_dir: env::var("INTERPRETER_DEBUG_DIR").ok().map(PathBuf::from),
        auth: DevAuthConfig {
            default_user_id,
            require_dev_header: env_flag("CHAT_DEMO_REQUIRE_DEV_HEADER"),
        },
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .route("/demo/whoami", get(whoami_handler))
        .merge(pidsketch::api::routes::<DemoApp>());

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .layer(from_fn_with_state(
            app_state.clone(),
            dev_identity_middleware,
        ))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!("pidsketch demo server listening on http://{}", bind_addr);
    println!("api base path: /api/v1");
    println!("auth shim header: x-dev-user-id (defaults to the built-in demo user)");
    println!("instructions like 'Pump -> Filter, Filter -> Tank' parse offline");

    axum::serve(listener, app)
        .await
        .context("demo server failed")
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

async fn whoami_handler(CurrentUser(user_id): CurrentUser) -> Json<serde_json::Value> {
    Json(json!({
        "userId": user_id.to_string(),
    }))
}

async fn dev_identity_middleware(
    State(app): State<DemoApp>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_id = match parse_user_id(req.headers(), &app.auth) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    req.extensions_mut().insert(CurrentUser(user_id));
    next.run(req).await
}

fn parse_user_id(headers: &HeaderMap, auth: &DevAuthConfig) -> Result<UserId, Response> {
    let Some(raw_user_id) = headers
        .get("x-dev-user-id")
        .and_then(|value| value.to_str().ok())
    else {
        if auth.require_dev_header {
            return Err(json_error(
                StatusCode::UNAUTHORIZED,
                "missing_dev_user_id",
                "x-dev-user-id header is required",
            ));
        }
        return Ok(auth.default_user_id);
    };

    raw_user_id.trim().parse().map(UserId).map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_dev_user_id",
            "invalid integer user id",
        )
    })
}

fn json_error(status: StatusCode, code: &'static str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        })),
    )
        .into_response()
}
