#[cfg(feature = "api")]
pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod interpreter;
pub mod models;
#[cfg(feature = "sqlx")]
pub mod operations;
pub mod reconcile;
#[cfg(feature = "sqlx")]
pub mod users;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{CurrentUser, GraphApp, HasPool};
    pub use crate::config::{init_dotenv, AppConfig, DatabaseConfig};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{
        create_graph, create_tables, delete_graph, get_graph, get_version, list_graphs_for_user,
        list_versions, rename_version_description, restore_version, update_description,
        update_graph,
    };
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::interpreter::{
        build_request, GraphContext, Interpreter, InterpreterReply, InterpreterRequest,
        ScriptedInterpreter,
    };
    pub use crate::models::{
        ChatPayload, CreateGraphPayload, Edge, GraphId, GraphSummary, PidGraph, Snapshot,
        SnapshotId, UpdateDescriptionPayload, UpdateGraphPayload, UserId,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::operations::{
        ChatOutcome, GraphOperation, GraphOperationResult, GraphOperations,
    };
    pub use crate::reconcile::{ReconciledGraph, Reconciler};
    #[cfg(feature = "sqlx")]
    pub use crate::users::{create_user, credentials_for, find_or_create_federated, get_user};
}
