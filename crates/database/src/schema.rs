use sqlx::{Executor, SqliteConnection};

/// Creates all tables and indexes. Every statement is idempotent so this
/// runs unconditionally at startup.
pub async fn initialize(ex: &mut SqliteConnection) -> sqlx::Result<()> {
    for statement in STATEMENTS {
        ex.execute(*statement).await?;
    }
    Ok(())
}

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        height INTEGER PRIMARY KEY,
        hash TEXT NOT NULL,
        time INTEGER NOT NULL,
        tx_count INTEGER NOT NULL,
        size INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS transactions (
        txid TEXT PRIMARY KEY,
        block_height INTEGER NOT NULL,
        input_count INTEGER NOT NULL,
        output_count INTEGER NOT NULL,
        total_input REAL NOT NULL,
        total_output REAL NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS flow_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        txid TEXT NOT NULL,
        vout INTEGER NOT NULL,
        block_height INTEGER NOT NULL,
        block_time INTEGER NOT NULL,
        from_address TEXT NOT NULL,
        from_type TEXT NOT NULL,
        from_details TEXT,
        to_address TEXT NOT NULL,
        to_type TEXT NOT NULL,
        to_details TEXT,
        flow_type TEXT NOT NULL,
        amount REAL NOT NULL,
        classification_level INTEGER NOT NULL DEFAULT 0,
        intermediary_wallet TEXT,
        hop_chain TEXT,
        analysis_timestamp INTEGER,
        data_source TEXT NOT NULL DEFAULT 'sync',
        UNIQUE (txid, vout)
    );",
    "CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_height ON transactions (block_height);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_block_height ON flow_events (block_height);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_block_time ON flow_events (block_time);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_flow_type ON flow_events (flow_type);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_from_type ON flow_events (from_type);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_to_type ON flow_events (to_type);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_from_address ON flow_events (from_address);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_to_address ON flow_events (to_address);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_classification_level \
        ON flow_events (classification_level);",
    "CREATE INDEX IF NOT EXISTS idx_flow_events_data_source ON flow_events (data_source);",
];
