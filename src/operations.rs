use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db;
use crate::error::Result;
use crate::interpreter::GraphContext;
use crate::models::{
    ChatPayload, CreateGraphPayload, GraphId, GraphSummary, PidGraph, Snapshot,
    UpdateDescriptionPayload, UpdateGraphPayload, UserId,
};
use crate::reconcile::{ReconciledGraph, Reconciler};

/// High-level graph actions, one entry per externally triggered operation.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session
/// state, not from request or tool arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphOperation {
    Create {
        payload: CreateGraphPayload,
    },
    Replace {
        graph_id: GraphId,
        payload: UpdateGraphPayload,
    },
    /// Apply a conversational instruction to an existing graph: interpreter
    /// round-trip, then an atomic current-state write plus snapshot append.
    Chat {
        graph_id: GraphId,
        payload: ChatPayload,
    },
    /// Parse an instruction into a graph without persisting anything.
    Parse {
        payload: ChatPayload,
    },
    Get {
        graph_id: GraphId,
    },
    List,
    Delete {
        graph_id: GraphId,
    },
    ListVersions {
        graph_id: GraphId,
    },
    GetVersion {
        graph_id: GraphId,
        version_number: i64,
    },
    Restore {
        graph_id: GraphId,
        version_number: i64,
    },
    RenameVersion {
        graph_id: GraphId,
        version_number: i64,
        payload: UpdateDescriptionPayload,
    },
    UpdateDescription {
        graph_id: GraphId,
        payload: UpdateDescriptionPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GraphOperationResult {
    Graph {
        graph: PidGraph,
        #[serde(skip_serializing_if = "String::is_empty")]
        assistant_note: String,
    },
    Graphs {
        items: Vec<GraphSummary>,
    },
    Parsed {
        nodes: Vec<String>,
        edges: Vec<crate::models::Edge>,
        assistant_note: String,
    },
    Versions {
        items: Vec<Snapshot>,
    },
    Version {
        snapshot: Snapshot,
    },
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub graph: PidGraph,
    pub assistant_note: String,
}

#[derive(Clone)]
pub struct GraphOperations {
    pool: Arc<SqlitePool>,
    reconciler: Reconciler,
}

impl GraphOperations {
    pub fn new(pool: Arc<SqlitePool>, reconciler: Reconciler) -> Self {
        Self { pool, reconciler }
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.pool)
    }

    pub async fn execute(
        &self,
        actor: UserId,
        operation: GraphOperation,
    ) -> Result<GraphOperationResult> {
        match operation {
            GraphOperation::Create { payload } => {
                let graph = self.create_graph(actor, payload).await?;
                Ok(GraphOperationResult::Graph {
                    graph,
                    assistant_note: String::new(),
                })
            }
            GraphOperation::Replace { graph_id, payload } => {
                let graph = self.replace_graph(actor, graph_id, payload).await?;
                Ok(GraphOperationResult::Graph {
                    graph,
                    assistant_note: String::new(),
                })
            }
            GraphOperation::Chat { graph_id, payload } => {
                let outcome = self.chat(actor, graph_id, &payload.instruction).await?;
                Ok(GraphOperationResult::Graph {
                    graph: outcome.graph,
                    assistant_note: outcome.assistant_note,
                })
            }
            GraphOperation::Parse { payload } => {
                let parsed = self.parse_instruction(&payload.instruction).await?;
                Ok(GraphOperationResult::Parsed {
                    nodes: parsed.nodes,
                    edges: parsed.edges,
                    assistant_note: parsed.assistant_note,
                })
            }
            GraphOperation::Get { graph_id } => {
                let graph = self.get_graph(actor, graph_id).await?;
                Ok(GraphOperationResult::Graph {
                    graph,
                    assistant_note: String::new(),
                })
            }
            GraphOperation::List => {
                let items = self.list_graphs(actor).await?;
                Ok(GraphOperationResult::Graphs { items })
            }
            GraphOperation::Delete { graph_id } => {
                self.delete_graph(actor, graph_id).await?;
                Ok(GraphOperationResult::Deleted)
            }
            GraphOperation::ListVersions { graph_id } => {
                let items = self.list_versions(actor, graph_id).await?;
                Ok(GraphOperationResult::Versions { items })
            }
            GraphOperation::GetVersion {
                graph_id,
                version_number,
            } => {
                let snapshot = self.get_version(actor, graph_id, version_number).await?;
                Ok(GraphOperationResult::Version { snapshot })
            }
            GraphOperation::Restore {
                graph_id,
                version_number,
            } => {
                let graph = self.restore_version(actor, graph_id, version_number).await?;
                Ok(GraphOperationResult::Graph {
                    graph,
                    assistant_note: String::new(),
                })
            }
            GraphOperation::RenameVersion {
                graph_id,
                version_number,
                payload,
            } => {
                self.rename_version_description(
                    actor,
                    graph_id,
                    version_number,
                    &payload.instruction,
                )
                .await?;
                Ok(GraphOperationResult::Updated)
            }
            GraphOperation::UpdateDescription { graph_id, payload } => {
                self.update_description(actor, graph_id, &payload.instruction)
                    .await?;
                Ok(GraphOperationResult::Updated)
            }
        }
    }

    pub async fn create_graph(
        &self,
        actor: UserId,
        payload: CreateGraphPayload,
    ) -> Result<PidGraph> {
        db::create_graph(&self.pool, actor, payload).await
    }

    pub async fn replace_graph(
        &self,
        actor: UserId,
        graph_id: GraphId,
        payload: UpdateGraphPayload,
    ) -> Result<PidGraph> {
        db::update_graph(&self.pool, actor, graph_id, payload).await
    }

    /// The conversational path. The ownership-checked load happens first; the
    /// interpreter round-trip writes nothing, so a reconciliation failure (or
    /// a caller-side abort) leaves the graph and its history untouched.
    pub async fn chat(
        &self,
        actor: UserId,
        graph_id: GraphId,
        instruction: &str,
    ) -> Result<ChatOutcome> {
        let existing = db::get_graph(&self.pool, actor, graph_id).await?;

        let prior = GraphContext {
            nodes: &existing.nodes,
            edges: &existing.edges,
        };
        let reconciled = self.reconciler.reconcile(instruction, Some(prior)).await?;

        let graph = db::update_graph(
            &self.pool,
            actor,
            graph_id,
            UpdateGraphPayload {
                filename: existing.filename,
                instruction: Some(instruction.to_string()),
                nodes: reconciled.nodes,
                edges: reconciled.edges,
            },
        )
        .await?;

        Ok(ChatOutcome {
            graph,
            assistant_note: reconciled.assistant_note,
        })
    }

    pub async fn parse_instruction(&self, instruction: &str) -> Result<ReconciledGraph> {
        self.reconciler.reconcile(instruction, None).await
    }

    pub async fn get_graph(&self, actor: UserId, graph_id: GraphId) -> Result<PidGraph> {
        db::get_graph(&self.pool, actor, graph_id).await
    }

    pub async fn list_graphs(&self, actor: UserId) -> Result<Vec<GraphSummary>> {
        db::list_graphs_for_user(&self.pool, actor).await
    }

    pub async fn delete_graph(&self, actor: UserId, graph_id: GraphId) -> Result<()> {
        db::delete_graph(&self.pool, actor, graph_id).await
    }

    pub async fn list_versions(&self, actor: UserId, graph_id: GraphId) -> Result<Vec<Snapshot>> {
        db::list_versions(&self.pool, actor, graph_id).await
    }

    pub async fn get_version(
        &self,
        actor: UserId,
        graph_id: GraphId,
        version_number: i64,
    ) -> Result<Snapshot> {
        db::get_version(&self.pool, actor, graph_id, version_number).await
    }

    pub async fn restore_version(
        &self,
        actor: UserId,
        graph_id: GraphId,
        version_number: i64,
    ) -> Result<PidGraph> {
        db::restore_version(&self.pool, actor, graph_id, version_number).await
    }

    pub async fn rename_version_description(
        &self,
        actor: UserId,
        graph_id: GraphId,
        version_number: i64,
        instruction: &str,
    ) -> Result<()> {
        db::rename_version_description(&self.pool, actor, graph_id, version_number, instruction)
            .await
    }

    pub async fn update_description(
        &self,
        actor: UserId,
        graph_id: GraphId,
        instruction: &str,
    ) -> Result<()> {
        db::update_description(&self.pool, actor, graph_id, instruction).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::db;
    use crate::error::ErrorKind;
    use crate::interpreter::{InterpreterReply, ScriptedInterpreter};
    use crate::models::Edge;
    use crate::users;

    async fn test_ops(interpreter: ScriptedInterpreter) -> (GraphOperations, Arc<ScriptedInterpreter>, UserId) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::create_tables(&pool).await.expect("migrations");
        let actor = users::create_user(&pool, "operator", "$test$hash")
            .await
            .expect("create user")
            .expect("username available");

        let interpreter = Arc::new(interpreter);
        let reconciler = Reconciler::new(Arc::clone(&interpreter) as Arc<dyn crate::interpreter::Interpreter>, None);
        (
            GraphOperations::new(Arc::new(pool), reconciler),
            interpreter,
            actor,
        )
    }

    fn seed_payload() -> CreateGraphPayload {
        CreateGraphPayload {
            filename: "plant.png".to_string(),
            instruction: Some("pump feeds tank".to_string()),
            nodes: vec!["Pump".to_string(), "Tank".to_string()],
            edges: vec![Edge::new("Pump", "Tank")],
        }
    }

    #[tokio::test]
    async fn chat_applies_reconciled_graph_and_appends_a_version() {
        let scripted = ScriptedInterpreter::structured(json!({
            "nodes": ["Pump", "Filter", "Tank"],
            "edges": [["Pump", "Filter"], ["Filter", "Tank"]],
            "assistant": "Inserted the filter inline."
        }));
        let (ops, interpreter, actor) = test_ops(scripted).await;
        let graph = ops.create_graph(actor, seed_payload()).await.expect("create");

        let outcome = ops
            .chat(actor, graph.id, "add a filter between Pump and Tank")
            .await
            .expect("chat");

        assert_eq!(outcome.graph.nodes, vec!["Pump", "Filter", "Tank"]);
        assert_eq!(
            outcome.graph.edges,
            vec![Edge::new("Pump", "Filter"), Edge::new("Filter", "Tank")]
        );
        assert_eq!(
            outcome.graph.instruction.as_deref(),
            Some("add a filter between Pump and Tank")
        );
        assert_eq!(outcome.assistant_note, "Inserted the filter inline.");

        let versions = ops.list_versions(actor, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_number, 2);
        assert_eq!(versions[0].nodes, vec!["Pump", "Filter", "Tank"]);

        // The edit prompt carried the prior graph, not a fresh-parse prompt.
        let requests = interpreter.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains(r#"Nodes: ["Pump","Tank"]"#));
        assert!(requests[0].prompt.contains(r#"Edges: [["Pump","Tank"]]"#));
    }

    #[tokio::test]
    async fn unparseable_reply_leaves_graph_and_history_untouched() {
        let scripted = ScriptedInterpreter::text("not json at all");
        let (ops, _, actor) = test_ops(scripted).await;
        let graph = ops.create_graph(actor, seed_payload()).await.expect("create");

        let err = ops
            .chat(actor, graph.id, "add a filter")
            .await
            .expect_err("garbage reply fails");
        assert_eq!(err.kind, ErrorKind::InterpreterOutputUnparseable);

        let unchanged = ops.get_graph(actor, graph.id).await.expect("get");
        assert_eq!(unchanged.nodes, vec!["Pump", "Tank"]);
        assert_eq!(unchanged.instruction.as_deref(), Some("pump feeds tank"));
        let versions = ops.list_versions(actor, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_rejected_without_writes() {
        let scripted = ScriptedInterpreter::structured(json!({"nodes": [], "edges": []}));
        let (ops, _, actor) = test_ops(scripted).await;
        let graph = ops.create_graph(actor, seed_payload()).await.expect("create");

        let err = ops
            .chat(actor, graph.id, "remove everything")
            .await
            .expect_err("empty graph fails");
        assert_eq!(err.kind, ErrorKind::EmptyResult);

        let versions = ops.list_versions(actor, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn chat_on_foreign_graph_never_reaches_the_interpreter() {
        let scripted = ScriptedInterpreter::structured(json!({"nodes": ["X"], "edges": []}));
        let (ops, interpreter, actor) = test_ops(scripted).await;
        let graph = ops.create_graph(actor, seed_payload()).await.expect("create");

        let stranger = UserId(actor.0 + 1000);
        let err = ops
            .chat(stranger, graph.id, "add a valve")
            .await
            .expect_err("foreign graph");
        assert_eq!(err.kind, ErrorKind::NotFoundOrForbidden);
        assert!(interpreter.requests().is_empty());
    }

    #[tokio::test]
    async fn parse_instruction_handles_prose_wrapped_replies() {
        let scripted = ScriptedInterpreter::text(
            "Here you go: {\"nodes\": [\"Pump\", \"UV Filter\"], \"edges\": [[\"Pump\", \"UV Filter\"]], \"assistant\": \"Confirm the flow rate.\"} Let me know!",
        );
        let (ops, interpreter, _) = test_ops(scripted).await;

        let parsed = ops
            .parse_instruction("pump feeds a UV filter")
            .await
            .expect("parse");
        assert_eq!(parsed.nodes, vec!["Pump", "UV Filter"]);
        assert_eq!(parsed.edges, vec![Edge::new("Pump", "UV Filter")]);
        assert_eq!(parsed.assistant_note, "Confirm the flow rate.");

        let requests = interpreter.requests();
        assert!(requests[0].prompt.starts_with("Parse the following description"));
    }

    #[tokio::test]
    async fn execute_routes_tagged_operations() {
        let scripted = ScriptedInterpreter::new([]);
        let (ops, _, actor) = test_ops(scripted).await;
        let graph = ops.create_graph(actor, seed_payload()).await.expect("create");

        let result = ops
            .execute(
                actor,
                GraphOperation::GetVersion {
                    graph_id: graph.id,
                    version_number: 1,
                },
            )
            .await
            .expect("execute");
        assert!(matches!(
            result,
            GraphOperationResult::Version { snapshot } if snapshot.version_number == 1
        ));

        let deleted = ops
            .execute(actor, GraphOperation::Delete { graph_id: graph.id })
            .await
            .expect("execute delete");
        assert!(matches!(deleted, GraphOperationResult::Deleted));
    }

    #[test]
    fn operations_deserialize_from_tagged_json() {
        let chat: GraphOperation = serde_json::from_str(
            r#"{"operation": "chat", "graph_id": 7, "payload": {"instruction": "add a filter"}}"#,
        )
        .expect("chat operation parses");
        assert!(matches!(
            chat,
            GraphOperation::Chat { graph_id: GraphId(7), ref payload } if payload.instruction == "add a filter"
        ));

        let restore: GraphOperation = serde_json::from_str(
            r#"{"operation": "restore", "graph_id": 7, "version_number": 2}"#,
        )
        .expect("restore operation parses");
        assert!(matches!(
            restore,
            GraphOperation::Restore {
                graph_id: GraphId(7),
                version_number: 2
            }
        ));
    }
}
