use sqlx::SqliteConnection;

/// Aggregate view over the whole database, reported by the status surface
/// and the periodic sync log line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stats {
    pub block_count: i64,
    pub transaction_count: i64,
    pub flow_event_count: i64,
    /// (flow_type, event count, total amount) per stored flow type.
    pub flows_by_type: Vec<FlowTypeStats>,
    /// (classification level, data source, count) for enhancement progress.
    pub by_classification: Vec<ClassificationStats>,
    pub min_height: Option<i64>,
    pub max_height: Option<i64>,
    pub database_bytes: i64,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct FlowTypeStats {
    pub flow_type: String,
    pub count: i64,
    pub total_amount: f64,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct ClassificationStats {
    pub classification_level: i64,
    pub data_source: String,
    pub count: i64,
}

pub async fn fetch(ex: &mut SqliteConnection) -> sqlx::Result<Stats> {
    let block_count = crate::blocks::count(&mut *ex).await?;
    let transaction_count = crate::transactions::count(&mut *ex).await?;
    let flow_event_count = crate::flow_events::count(&mut *ex).await?;
    let (min_height, max_height) = crate::blocks::height_range(&mut *ex).await?.unzip();

    const BY_TYPE: &str = "\
        SELECT flow_type, COUNT(*) AS count, COALESCE(SUM(amount), 0.0) AS total_amount \
        FROM flow_events GROUP BY flow_type ORDER BY flow_type;";
    let flows_by_type = sqlx::query_as::<_, FlowTypeStats>(BY_TYPE)
        .fetch_all(&mut *ex)
        .await?;

    const BY_CLASSIFICATION: &str = "\
        SELECT classification_level, data_source, COUNT(*) AS count \
        FROM flow_events GROUP BY classification_level, data_source \
        ORDER BY classification_level, data_source;";
    let by_classification = sqlx::query_as::<_, ClassificationStats>(BY_CLASSIFICATION)
        .fetch_all(&mut *ex)
        .await?;

    let page_count: i64 = sqlx::query_scalar("PRAGMA page_count;")
        .fetch_one(&mut *ex)
        .await?;
    let page_size: i64 = sqlx::query_scalar("PRAGMA page_size;")
        .fetch_one(&mut *ex)
        .await?;

    Ok(Stats {
        block_count,
        transaction_count,
        flow_event_count,
        flows_by_type,
        by_classification,
        min_height,
        max_height,
        database_bytes: page_count * page_size,
    })
}
