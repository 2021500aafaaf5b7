use anyhow::anyhow;
use chrono::{NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, SqlitePool};

use crate::error::{LibError, Result};
use crate::models::{
    CreateGraphPayload, Edge, GraphId, GraphSummary, PidGraph, Snapshot, SnapshotId,
    UpdateGraphPayload, UserId,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_tables(pool: &SqlitePool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct GraphRow {
    id: i64,
    user_id: i64,
    filename: String,
    instruction: Option<String>,
    nodes_json: Option<String>,
    edges_json: Option<String>,
    created_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct GraphSummaryRow {
    id: i64,
    filename: String,
    instruction: Option<String>,
    created_at: NaiveDateTime,
    version_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    id: i64,
    graph_id: i64,
    version_number: i64,
    instruction: Option<String>,
    nodes_json: Option<String>,
    edges_json: Option<String>,
    created_at: NaiveDateTime,
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

fn encode_nodes(nodes: &[String]) -> Result<String> {
    serde_json::to_string(nodes)
        .map_err(|err| LibError::database("Failed to encode graph nodes", anyhow!(err)))
}

fn encode_edges(edges: &[Edge]) -> Result<String> {
    serde_json::to_string(edges)
        .map_err(|err| LibError::database("Failed to encode graph edges", anyhow!(err)))
}

fn decode_nodes(raw: Option<&str>) -> Result<Vec<String>> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text)
            .map_err(|err| LibError::database("Stored graph nodes are corrupt", anyhow!(err))),
    }
}

fn decode_edges(raw: Option<&str>) -> Result<Vec<Edge>> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text)
            .map_err(|err| LibError::database("Stored graph edges are corrupt", anyhow!(err))),
    }
}

fn hydrate_graph(row: GraphRow) -> Result<PidGraph> {
    Ok(PidGraph {
        id: GraphId(row.id),
        owner_user_id: UserId(row.user_id),
        filename: row.filename,
        instruction: row.instruction,
        nodes: decode_nodes(row.nodes_json.as_deref())?,
        edges: decode_edges(row.edges_json.as_deref())?,
        created_at: row.created_at,
    })
}

fn hydrate_snapshot(row: SnapshotRow) -> Result<Snapshot> {
    Ok(Snapshot {
        id: SnapshotId(row.id),
        graph_id: GraphId(row.graph_id),
        version_number: row.version_number,
        instruction: row.instruction,
        nodes: decode_nodes(row.nodes_json.as_deref())?,
        edges: decode_edges(row.edges_json.as_deref())?,
        created_at: row.created_at,
    })
}

/// Ownership guard, transactional variant. A graph that is absent and a
/// graph owned by someone else produce the same error on purpose.
async fn load_owned_graph(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    actor: UserId,
    graph_id: GraphId,
) -> Result<GraphRow> {
    let row = sqlx::query_as::<_, GraphRow>(
        r#"
        SELECT id, user_id, filename, instruction, nodes_json, edges_json, created_at
        FROM graphs
        WHERE id = $1
          AND user_id = $2
        "#,
    )
    .bind(graph_id.0)
    .bind(actor.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to query graph", err))?;

    row.ok_or_else(|| {
        LibError::not_found_or_forbidden(
            "Graph not found",
            anyhow!("graph {} not found or not owned by user {}", graph_id, actor),
        )
    })
}

/// Ownership guard for read-only paths that perform no follow-up mutation.
async fn ensure_owned(pool: &SqlitePool, actor: UserId, graph_id: GraphId) -> Result<()> {
    let owned: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM graphs
            WHERE id = $1
              AND user_id = $2
        )
        "#,
    )
    .bind(graph_id.0)
    .bind(actor.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to query graph", err))?;

    if owned.0 {
        Ok(())
    } else {
        Err(LibError::not_found_or_forbidden(
            "Graph not found",
            anyhow!("graph {} not found or not owned by user {}", graph_id, actor),
        ))
    }
}

/// Appends the next snapshot for a graph inside the caller's transaction.
///
/// Version numbers are dense and 1-based: max(existing) + 1. The read and the
/// insert share the transaction, and UNIQUE(graph_id, version_number) backs
/// the sequencing against concurrent appends.
async fn append_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    graph_id: GraphId,
    instruction: Option<&str>,
    nodes_json: &str,
    edges_json: &str,
    created_at: NaiveDateTime,
) -> Result<i64> {
    let next: (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(MAX(version_number), 0) + 1
        FROM graph_versions
        WHERE graph_id = $1
        "#,
    )
    .bind(graph_id.0)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to compute next version number", err))?;

    sqlx::query(
        r#"
        INSERT INTO graph_versions (graph_id, version_number, instruction, nodes_json, edges_json, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(graph_id.0)
    .bind(next.0)
    .bind(instruction)
    .bind(nodes_json)
    .bind(edges_json)
    .bind(created_at)
    .execute(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to append graph version", err))?;

    Ok(next.0)
}

/// Creates a graph row and its snapshot version 1 with an identical payload,
/// atomically. A graph with zero snapshots never becomes observable.
pub async fn create_graph(
    pool: &SqlitePool,
    actor: UserId,
    payload: CreateGraphPayload,
) -> Result<PidGraph> {
    let definition = payload.normalize()?;
    let nodes_json = encode_nodes(&definition.nodes)?;
    let edges_json = encode_edges(&definition.edges)?;
    let now = Utc::now().naive_utc();

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO graphs (user_id, filename, instruction, nodes_json, edges_json, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(actor.0)
    .bind(&definition.filename)
    .bind(&definition.instruction)
    .bind(&nodes_json)
    .bind(&edges_json)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to create graph", err))?;

    let graph_id = GraphId(inserted.last_insert_rowid());
    append_version(
        &mut tx,
        graph_id,
        definition.instruction.as_deref(),
        &nodes_json,
        &edges_json,
        now,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    get_graph(pool, actor, graph_id).await
}

pub async fn get_graph(pool: &SqlitePool, actor: UserId, graph_id: GraphId) -> Result<PidGraph> {
    let row = sqlx::query_as::<_, GraphRow>(
        r#"
        SELECT id, user_id, filename, instruction, nodes_json, edges_json, created_at
        FROM graphs
        WHERE id = $1
          AND user_id = $2
        "#,
    )
    .bind(graph_id.0)
    .bind(actor.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query graph", err))?;

    match row {
        Some(row) => hydrate_graph(row),
        None => Err(LibError::not_found_or_forbidden(
            "Graph not found",
            anyhow!("graph {} not found or not owned by user {}", graph_id, actor),
        )),
    }
}

pub async fn list_graphs_for_user(pool: &SqlitePool, actor: UserId) -> Result<Vec<GraphSummary>> {
    let rows = sqlx::query_as::<_, GraphSummaryRow>(
        r#"
        SELECT
            g.id,
            g.filename,
            g.instruction,
            g.created_at,
            COALESCE(v.version_count, 0) AS version_count
        FROM graphs g
        LEFT JOIN (
            SELECT graph_id, COUNT(*) AS version_count
            FROM graph_versions
            GROUP BY graph_id
        ) v
        ON v.graph_id = g.id
        WHERE g.user_id = $1
        ORDER BY g.id DESC
        "#,
    )
    .bind(actor.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list graphs", err))?;

    Ok(rows
        .into_iter()
        .map(|row| GraphSummary {
            id: GraphId(row.id),
            filename: row.filename,
            instruction: row.instruction,
            created_at: row.created_at,
            version_count: row.version_count,
        })
        .collect())
}

/// Writes the new payload onto the graph row, then appends a snapshot with
/// that same payload. The snapshot always records the state *after* the edit,
/// never a pre-image.
pub async fn update_graph(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
    payload: UpdateGraphPayload,
) -> Result<PidGraph> {
    let definition = payload.normalize()?;
    let nodes_json = encode_nodes(&definition.nodes)?;
    let edges_json = encode_edges(&definition.edges)?;
    let now = Utc::now().naive_utc();

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    load_owned_graph(&mut tx, actor, graph_id).await?;

    sqlx::query(
        r#"
        UPDATE graphs
        SET filename = $1,
            instruction = $2,
            nodes_json = $3,
            edges_json = $4
        WHERE id = $5
        "#,
    )
    .bind(&definition.filename)
    .bind(&definition.instruction)
    .bind(&nodes_json)
    .bind(&edges_json)
    .bind(graph_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to update graph", err))?;

    append_version(
        &mut tx,
        graph_id,
        definition.instruction.as_deref(),
        &nodes_json,
        &edges_json,
        now,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    get_graph(pool, actor, graph_id).await
}

/// Overwrites the graph's current instruction/nodes/edges with a past
/// snapshot's payload. The restore itself is not recorded as a new snapshot;
/// the next edit after a restore produces the next version number as if it
/// were a fresh edit.
pub async fn restore_version(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
    version_number: i64,
) -> Result<PidGraph> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    load_owned_graph(&mut tx, actor, graph_id).await?;

    let snapshot = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, graph_id, version_number, instruction, nodes_json, edges_json, created_at
        FROM graph_versions
        WHERE graph_id = $1
          AND version_number = $2
        "#,
    )
    .bind(graph_id.0)
    .bind(version_number)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to query graph version", err))?
    .ok_or_else(|| {
        LibError::not_found_or_forbidden(
            "Graph version not found",
            anyhow!("graph {} has no version {}", graph_id, version_number),
        )
    })?;

    sqlx::query(
        r#"
        UPDATE graphs
        SET instruction = $1,
            nodes_json = $2,
            edges_json = $3
        WHERE id = $4
        "#,
    )
    .bind(&snapshot.instruction)
    .bind(&snapshot.nodes_json)
    .bind(&snapshot.edges_json)
    .bind(graph_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to restore graph version", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    get_graph(pool, actor, graph_id).await
}

/// Lightweight metadata edit: rewrites the current instruction text only.
/// This is the one mutation path that changes "current" without producing a
/// snapshot, so description tweaks do not spam version history.
pub async fn update_description(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
    instruction: &str,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    load_owned_graph(&mut tx, actor, graph_id).await?;

    sqlx::query(
        r#"
        UPDATE graphs
        SET instruction = $1
        WHERE id = $2
        "#,
    )
    .bind(instruction)
    .bind(graph_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to update graph description", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))
}

/// Deletes a graph and its entire snapshot history. Ownership is checked
/// here, inside the transaction, not left to the caller.
pub async fn delete_graph(pool: &SqlitePool, actor: UserId, graph_id: GraphId) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    load_owned_graph(&mut tx, actor, graph_id).await?;

    sqlx::query(
        r#"
        DELETE FROM graph_versions
        WHERE graph_id = $1
        "#,
    )
    .bind(graph_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete graph versions", err))?;

    sqlx::query(
        r#"
        DELETE FROM graphs
        WHERE id = $1
        "#,
    )
    .bind(graph_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete graph", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))
}

pub async fn list_versions(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
) -> Result<Vec<Snapshot>> {
    ensure_owned(pool, actor, graph_id).await?;

    let rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, graph_id, version_number, instruction, nodes_json, edges_json, created_at
        FROM graph_versions
        WHERE graph_id = $1
        ORDER BY version_number DESC
        "#,
    )
    .bind(graph_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list graph versions", err))?;

    rows.into_iter().map(hydrate_snapshot).collect()
}

pub async fn get_version(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
    version_number: i64,
) -> Result<Snapshot> {
    ensure_owned(pool, actor, graph_id).await?;

    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, graph_id, version_number, instruction, nodes_json, edges_json, created_at
        FROM graph_versions
        WHERE graph_id = $1
          AND version_number = $2
        "#,
    )
    .bind(graph_id.0)
    .bind(version_number)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query graph version", err))?;

    match row {
        Some(row) => hydrate_snapshot(row),
        None => Err(LibError::not_found_or_forbidden(
            "Graph version not found",
            anyhow!("graph {} has no version {}", graph_id, version_number),
        )),
    }
}

/// Rewrites the instruction text of one historical snapshot. The snapshot's
/// node/edge payload is untouched; snapshots are otherwise immutable.
pub async fn rename_version_description(
    pool: &SqlitePool,
    actor: UserId,
    graph_id: GraphId,
    version_number: i64,
    instruction: &str,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    load_owned_graph(&mut tx, actor, graph_id).await?;

    let updated = sqlx::query(
        r#"
        UPDATE graph_versions
        SET instruction = $1
        WHERE graph_id = $2
          AND version_number = $3
        "#,
    )
    .bind(instruction)
    .bind(graph_id.0)
    .bind(version_number)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to rename graph version", err))?;

    if updated.rows_affected() == 0 {
        return Err(LibError::not_found_or_forbidden(
            "Graph version not found",
            anyhow!("graph {} has no version {}", graph_id, version_number),
        ));
    }

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::error::ErrorKind;
    use crate::users;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        create_tables(&pool).await.expect("migrations");
        pool
    }

    async fn test_user(pool: &SqlitePool, username: &str) -> UserId {
        users::create_user(pool, username, "$test$hash")
            .await
            .expect("create user")
            .expect("username available")
    }

    fn payload(filename: &str, nodes: &[&str], edges: &[(&str, &str)]) -> CreateGraphPayload {
        CreateGraphPayload {
            filename: filename.to_string(),
            instruction: Some("initial layout".to_string()),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        }
    }

    fn update_from(graph: &PidGraph, nodes: &[&str], edges: &[(&str, &str)]) -> UpdateGraphPayload {
        UpdateGraphPayload {
            filename: graph.filename.clone(),
            instruction: graph.instruction.clone(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        }
    }

    #[tokio::test]
    async fn create_records_version_one_with_creation_payload() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;

        let graph = create_graph(
            &pool,
            owner,
            payload("plant.png", &["Pump", "Tank"], &[("Pump", "Tank")]),
        )
        .await
        .expect("create");

        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].nodes, graph.nodes);
        assert_eq!(versions[0].edges, graph.edges);
        assert_eq!(versions[0].instruction.as_deref(), Some("initial layout"));
    }

    #[tokio::test]
    async fn updates_append_dense_version_numbers() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(&pool, owner, payload("plant.png", &["Pump"], &[]))
            .await
            .expect("create");

        update_graph(&pool, owner, graph.id, update_from(&graph, &["Pump", "Tank"], &[]))
            .await
            .expect("first update");
        update_graph(
            &pool,
            owner,
            graph.id,
            update_from(&graph, &["Pump", "Tank", "Filter"], &[]),
        )
        .await
        .expect("second update");

        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn restore_rewrites_current_without_new_snapshot() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(
            &pool,
            owner,
            payload("plant.png", &["Pump", "Tank"], &[("Pump", "Tank")]),
        )
        .await
        .expect("create");
        update_graph(
            &pool,
            owner,
            graph.id,
            update_from(&graph, &["Pump", "Filter", "Tank"], &[("Pump", "Filter")]),
        )
        .await
        .expect("update");

        let restored = restore_version(&pool, owner, graph.id, 1)
            .await
            .expect("restore");
        assert_eq!(restored.nodes, vec!["Pump", "Tank"]);
        assert_eq!(restored.edges, vec![Edge::new("Pump", "Tank")]);
        assert_eq!(restored.filename, "plant.png");

        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 2, "restore must not append history");

        // The next edit picks up numbering where history left off.
        update_graph(&pool, owner, graph.id, update_from(&restored, &["Pump"], &[]))
            .await
            .expect("post-restore update");
        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        assert_eq!(versions[0].version_number, 3);
    }

    #[tokio::test]
    async fn restore_of_missing_version_is_not_found() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(&pool, owner, payload("plant.png", &["Pump"], &[]))
            .await
            .expect("create");

        let err = restore_version(&pool, owner, graph.id, 9)
            .await
            .expect_err("version 9 does not exist");
        assert_eq!(err.kind, ErrorKind::NotFoundOrForbidden);
    }

    #[tokio::test]
    async fn non_owner_cannot_read_or_mutate() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let intruder = test_user(&pool, "intruder").await;
        let graph = create_graph(
            &pool,
            owner,
            payload("plant.png", &["Pump", "Tank"], &[("Pump", "Tank")]),
        )
        .await
        .expect("create");

        let read = get_graph(&pool, intruder, graph.id).await;
        assert_eq!(read.expect_err("read denied").kind, ErrorKind::NotFoundOrForbidden);

        let update = update_graph(
            &pool,
            intruder,
            graph.id,
            update_from(&graph, &["Hijacked"], &[]),
        )
        .await;
        assert_eq!(update.expect_err("update denied").kind, ErrorKind::NotFoundOrForbidden);

        let restore = restore_version(&pool, intruder, graph.id, 1).await;
        assert_eq!(restore.expect_err("restore denied").kind, ErrorKind::NotFoundOrForbidden);

        let describe = update_description(&pool, intruder, graph.id, "mine now").await;
        assert_eq!(describe.expect_err("describe denied").kind, ErrorKind::NotFoundOrForbidden);

        let rename = rename_version_description(&pool, intruder, graph.id, 1, "mine now").await;
        assert_eq!(rename.expect_err("rename denied").kind, ErrorKind::NotFoundOrForbidden);

        let delete = delete_graph(&pool, intruder, graph.id).await;
        assert_eq!(delete.expect_err("delete denied").kind, ErrorKind::NotFoundOrForbidden);

        let untouched = get_graph(&pool, owner, graph.id).await.expect("still there");
        assert_eq!(untouched.nodes, vec!["Pump", "Tank"]);
        assert_eq!(untouched.instruction.as_deref(), Some("initial layout"));
        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn update_description_bypasses_history() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(&pool, owner, payload("plant.png", &["Pump"], &[]))
            .await
            .expect("create");

        update_description(&pool, owner, graph.id, "renamed project")
            .await
            .expect("describe");

        let current = get_graph(&pool, owner, graph.id).await.expect("get");
        assert_eq!(current.instruction.as_deref(), Some("renamed project"));
        let versions = list_versions(&pool, owner, graph.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].instruction.as_deref(), Some("initial layout"));
    }

    #[tokio::test]
    async fn rename_version_touches_instruction_only() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(
            &pool,
            owner,
            payload("plant.png", &["Pump", "Tank"], &[("Pump", "Tank")]),
        )
        .await
        .expect("create");

        rename_version_description(&pool, owner, graph.id, 1, "baseline")
            .await
            .expect("rename");

        let snapshot = get_version(&pool, owner, graph.id, 1).await.expect("get version");
        assert_eq!(snapshot.instruction.as_deref(), Some("baseline"));
        assert_eq!(snapshot.nodes, vec!["Pump", "Tank"]);
        assert_eq!(snapshot.edges, vec![Edge::new("Pump", "Tank")]);

        let missing = rename_version_description(&pool, owner, graph.id, 5, "nope").await;
        assert_eq!(missing.expect_err("no version 5").kind, ErrorKind::NotFoundOrForbidden);
    }

    #[tokio::test]
    async fn delete_removes_graph_and_history() {
        let pool = test_pool().await;
        let owner = test_user(&pool, "owner").await;
        let graph = create_graph(&pool, owner, payload("plant.png", &["Pump"], &[]))
            .await
            .expect("create");
        update_graph(&pool, owner, graph.id, update_from(&graph, &["Pump", "Tank"], &[]))
            .await
            .expect("update");

        delete_graph(&pool, owner, graph.id).await.expect("delete");

        let gone = get_graph(&pool, owner, graph.id).await;
        assert_eq!(gone.expect_err("graph gone").kind, ErrorKind::NotFoundOrForbidden);

        let orphans: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM graph_versions WHERE graph_id = $1",
        )
        .bind(graph.id.0)
        .fetch_one(&pool)
        .await
        .expect("count");
        assert_eq!(orphans.0, 0);
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_caller() {
        let pool = test_pool().await;
        let alice = test_user(&pool, "alice").await;
        let bob = test_user(&pool, "bob").await;
        create_graph(&pool, alice, payload("a.png", &["Pump"], &[]))
            .await
            .expect("create a");
        let second = create_graph(&pool, alice, payload("b.png", &["Tank"], &[]))
            .await
            .expect("create b");

        let mine = list_graphs_for_user(&pool, alice).await.expect("list");
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, second.id, "newest first");
        assert_eq!(mine[0].version_count, 1);

        let theirs = list_graphs_for_user(&pool, bob).await.expect("list");
        assert!(theirs.is_empty());
    }
}
