use {model::Block, sqlx::SqliteConnection};

pub async fn upsert(ex: &mut SqliteConnection, block: &Block) -> sqlx::Result<()> {
    const QUERY: &str = "\
        INSERT INTO blocks (height, hash, time, tx_count, size) \
        VALUES (?1, ?2, ?3, ?4, ?5) \
        ON CONFLICT (height) DO UPDATE SET \
            hash = excluded.hash, \
            time = excluded.time, \
            tx_count = excluded.tx_count, \
            size = excluded.size;";
    sqlx::query(QUERY)
        .bind(block.height)
        .bind(&block.hash)
        .bind(block.time)
        .bind(block.tx_count)
        .bind(block.size)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch(ex: &mut SqliteConnection, height: i64) -> sqlx::Result<Option<Block>> {
    const QUERY: &str = "SELECT height, hash, time, tx_count, size FROM blocks WHERE height = ?1;";
    sqlx::query_as::<_, BlockRow>(QUERY)
        .bind(height)
        .fetch_optional(ex)
        .await
        .map(|row| row.map(Into::into))
}

pub async fn count(ex: &mut SqliteConnection) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM blocks;")
        .fetch_one(ex)
        .await
}

/// The lowest and highest stored heights, or `None` while the table is
/// empty.
pub async fn height_range(ex: &mut SqliteConnection) -> sqlx::Result<Option<(i64, i64)>> {
    const QUERY: &str = "SELECT MIN(height), MAX(height) FROM blocks;";
    let (min, max): (Option<i64>, Option<i64>) =
        sqlx::query_as(QUERY).fetch_one(ex).await?;
    Ok(min.zip(max))
}

pub async fn delete_below(ex: &mut SqliteConnection, cutoff: i64) -> sqlx::Result<u64> {
    const QUERY: &str = "DELETE FROM blocks WHERE height < ?1;";
    let result = sqlx::query(QUERY).bind(cutoff).execute(ex).await?;
    Ok(result.rows_affected())
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    height: i64,
    hash: String,
    time: i64,
    tx_count: i64,
    size: i64,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            height: row.height,
            hash: row.hash,
            time: row.time,
            tx_count: row.tx_count,
            size: row.size,
        }
    }
}
