use {model::Transaction, sqlx::SqliteConnection};

pub async fn upsert(ex: &mut SqliteConnection, tx: &Transaction) -> sqlx::Result<()> {
    const QUERY: &str = "\
        INSERT INTO transactions \
            (txid, block_height, input_count, output_count, total_input, total_output) \
        VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
        ON CONFLICT (txid) DO UPDATE SET \
            block_height = excluded.block_height, \
            input_count = excluded.input_count, \
            output_count = excluded.output_count, \
            total_input = excluded.total_input, \
            total_output = excluded.total_output;";
    sqlx::query(QUERY)
        .bind(&tx.txid)
        .bind(tx.block_height)
        .bind(tx.input_count)
        .bind(tx.output_count)
        .bind(tx.total_input)
        .bind(tx.total_output)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch(ex: &mut SqliteConnection, txid: &str) -> sqlx::Result<Option<Transaction>> {
    const QUERY: &str = "\
        SELECT txid, block_height, input_count, output_count, total_input, total_output \
        FROM transactions WHERE txid = ?1;";
    sqlx::query_as::<_, TransactionRow>(QUERY)
        .bind(txid)
        .fetch_optional(ex)
        .await
        .map(|row| row.map(Into::into))
}

pub async fn count(ex: &mut SqliteConnection) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM transactions;")
        .fetch_one(ex)
        .await
}

pub async fn delete_below(ex: &mut SqliteConnection, cutoff: i64) -> sqlx::Result<u64> {
    const QUERY: &str = "DELETE FROM transactions WHERE block_height < ?1;";
    let result = sqlx::query(QUERY).bind(cutoff).execute(ex).await?;
    Ok(result.rows_affected())
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    txid: String,
    block_height: i64,
    input_count: i64,
    output_count: i64,
    total_input: f64,
    total_output: f64,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            txid: row.txid,
            block_height: row.block_height,
            input_count: row.input_count,
            output_count: row.output_count,
            total_input: row.total_input,
            total_output: row.total_output,
        }
    }
}
