//! User account store.
//!
//! Authentication itself (password verification, OAuth token exchange) is an
//! external collaborator's job; this module only maps credentials or a
//! federated `(provider, provider_id)` pair to a stable local [`UserId`].

use anyhow::anyhow;
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::error::{LibError, Result};
use crate::models::UserId;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    username: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    created_at: NaiveDateTime,
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Creates a local-credential account. The password hash is produced by the
/// caller's auth provider; this layer never sees the cleartext password.
///
/// Returns `Ok(None)` when the username is already taken: integrity
/// conflicts are absorbed here rather than propagated raw.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> Result<Option<UserId>> {
    let now = Utc::now().naive_utc();
    let inserted = sqlx::query(
        r#"
        INSERT INTO users (username, password_hash, created_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(username)
    .bind(password_hash)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(result) => Ok(Some(UserId(result.last_insert_rowid()))),
        Err(err) if is_unique_violation(&err) => {
            tracing::debug!(username, "duplicate username on create_user");
            Ok(None)
        }
        Err(err) => Err(db_err("Failed to create user", err)),
    }
}

/// Returns the id and stored password hash for a username, for the external
/// auth provider to verify against. Federated accounts have no hash.
pub async fn credentials_for(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<(UserId, Option<String>)>> {
    let row: Option<(i64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT id, password_hash
        FROM users
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query user credentials", err))?;

    Ok(row.map(|(id, hash)| (UserId(id), hash)))
}

/// Find-or-create keyed on `(provider, provider_id)`.
///
/// New federated accounts get a generated username: the email prefix when an
/// email is available, otherwise `provider_providerid`, de-duplicated with a
/// numeric suffix.
pub async fn find_or_create_federated(
    pool: &SqlitePool,
    provider: &str,
    provider_id: &str,
    email: Option<&str>,
    display_name: Option<&str>,
) -> Result<Option<UserId>> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM users
        WHERE provider = $1
          AND provider_id = $2
        "#,
    )
    .bind(provider)
    .bind(provider_id)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query federated user", err))?;

    if let Some((id,)) = existing {
        tracing::debug!(provider, user_id = id, "found existing federated user");
        return Ok(Some(UserId(id)));
    }

    let base_username = match email.and_then(|e| e.split('@').next()).filter(|p| !p.is_empty()) {
        Some(prefix) => prefix.to_string(),
        None => format!("{}_{}", provider, provider_id),
    };

    let mut username = base_username.clone();
    let mut counter = 1u32;
    loop {
        let taken: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM users
                WHERE username = $1
            )
            "#,
        )
        .bind(&username)
        .fetch_one(pool)
        .await
        .map_err(|err| db_err("Failed to query username availability", err))?;

        if !taken.0 {
            break;
        }
        username = format!("{}_{}", base_username, counter);
        counter += 1;
    }

    let now = Utc::now().naive_utc();
    let inserted = sqlx::query(
        r#"
        INSERT INTO users (username, password_hash, provider, provider_id, email, display_name, created_at)
        VALUES ($1, NULL, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&username)
    .bind(provider)
    .bind(provider_id)
    .bind(email)
    .bind(display_name)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(result) => {
            let id = result.last_insert_rowid();
            tracing::info!(provider, user_id = id, username, "created federated user");
            Ok(Some(UserId(id)))
        }
        Err(err) if is_unique_violation(&err) => {
            tracing::warn!(provider, "integrity conflict creating federated user");
            Ok(None)
        }
        Err(err) => Err(db_err("Failed to create federated user", err)),
    }
}

pub async fn get_user(pool: &SqlitePool, user_id: UserId) -> Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, email, display_name, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query user", err))?;

    Ok(row.map(|row| UserRecord {
        id: UserId(row.id),
        username: row.username,
        email: row.email,
        display_name: row.display_name,
        created_at: row.created_at,
    }))
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::db;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::create_tables(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn duplicate_username_is_absorbed_as_none() {
        let pool = test_pool().await;

        let first = create_user(&pool, "alice", "$hash$1").await.expect("first");
        assert!(first.is_some());

        let second = create_user(&pool, "alice", "$hash$2").await.expect("second");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn credentials_round_trip() {
        let pool = test_pool().await;
        let id = create_user(&pool, "alice", "$hash$1")
            .await
            .expect("create")
            .expect("available");

        let found = credentials_for(&pool, "alice").await.expect("query");
        assert_eq!(found, Some((id, Some("$hash$1".to_string()))));

        let missing = credentials_for(&pool, "nobody").await.expect("query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn federated_lookup_is_idempotent() {
        let pool = test_pool().await;

        let first = find_or_create_federated(&pool, "acme", "sub-123", Some("pat@example.com"), None)
            .await
            .expect("first")
            .expect("created");
        let second = find_or_create_federated(&pool, "acme", "sub-123", Some("pat@example.com"), None)
            .await
            .expect("second")
            .expect("found");
        assert_eq!(first, second);

        let record = get_user(&pool, first).await.expect("get").expect("exists");
        assert_eq!(record.username.as_deref(), Some("pat"));

        // Federated accounts carry no password hash.
        let creds = credentials_for(&pool, "pat").await.expect("query");
        assert_eq!(creds, Some((first, None)));
    }

    #[tokio::test]
    async fn generated_usernames_get_numeric_suffixes() {
        let pool = test_pool().await;
        create_user(&pool, "pat", "$hash$1")
            .await
            .expect("create")
            .expect("available");

        let federated = find_or_create_federated(&pool, "acme", "sub-456", Some("pat@example.com"), None)
            .await
            .expect("create")
            .expect("created");
        let record = get_user(&pool, federated).await.expect("get").expect("exists");
        assert_eq!(record.username.as_deref(), Some("pat_1"));

        let next = find_or_create_federated(&pool, "acme", "sub-789", Some("pat@other.com"), None)
            .await
            .expect("create")
            .expect("created");
        let record = get_user(&pool, next).await.expect("get").expect("exists");
        assert_eq!(record.username.as_deref(), Some("pat_2"));
    }

    #[tokio::test]
    async fn federated_username_without_email_uses_provider_pair() {
        let pool = test_pool().await;

        let id = find_or_create_federated(&pool, "acme", "sub-123", None, Some("Pat"))
            .await
            .expect("create")
            .expect("created");
        let record = get_user(&pool, id).await.expect("get").expect("exists");
        assert_eq!(record.username.as_deref(), Some("acme_sub-123"));
        assert_eq!(record.display_name.as_deref(), Some("Pat"));
    }
}
