use sqlx::SqliteConnection;

/// Checkpoint key for the highest block the ingestion pipeline committed.
pub const LATEST_SYNCED_HEIGHT: &str = "latest_synced_height";

pub async fn get(ex: &mut SqliteConnection, key: &str) -> sqlx::Result<Option<String>> {
    const QUERY: &str = "SELECT value FROM sync_state WHERE key = ?1;";
    sqlx::query_scalar(QUERY).bind(key).fetch_optional(ex).await
}

pub async fn set(ex: &mut SqliteConnection, key: &str, value: &str) -> sqlx::Result<()> {
    const QUERY: &str = "\
        INSERT INTO sync_state (key, value) VALUES (?1, ?2) \
        ON CONFLICT (key) DO UPDATE SET value = excluded.value;";
    sqlx::query(QUERY).bind(key).bind(value).execute(ex).await?;
    Ok(())
}
