use {
    model::{AddressType, ClassificationPatch, DataSource, Details, FlowEvent, FlowType},
    serde::Serialize,
    sqlx::SqliteConnection,
};

const COLUMNS: &str = "\
    id, txid, vout, block_height, block_time, \
    from_address, from_type, from_details, \
    to_address, to_type, to_details, \
    flow_type, amount, classification_level, \
    intermediary_wallet, hop_chain, analysis_timestamp, data_source";

/// Inserts one event, replacing any existing row for the same (txid, vout)
/// pair. Last write wins so re-ingesting a block is idempotent.
pub async fn upsert(ex: &mut SqliteConnection, event: &FlowEvent) -> sqlx::Result<()> {
    const QUERY: &str = "\
        INSERT INTO flow_events \
            (txid, vout, block_height, block_time, \
             from_address, from_type, from_details, \
             to_address, to_type, to_details, \
             flow_type, amount, classification_level, \
             intermediary_wallet, hop_chain, analysis_timestamp, data_source) \
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
        ON CONFLICT (txid, vout) DO UPDATE SET \
            block_height = excluded.block_height, \
            block_time = excluded.block_time, \
            from_address = excluded.from_address, \
            from_type = excluded.from_type, \
            from_details = excluded.from_details, \
            to_address = excluded.to_address, \
            to_type = excluded.to_type, \
            to_details = excluded.to_details, \
            flow_type = excluded.flow_type, \
            amount = excluded.amount, \
            classification_level = excluded.classification_level, \
            intermediary_wallet = excluded.intermediary_wallet, \
            hop_chain = excluded.hop_chain, \
            analysis_timestamp = excluded.analysis_timestamp, \
            data_source = excluded.data_source;";
    sqlx::query(QUERY)
        .bind(&event.txid)
        .bind(event.vout)
        .bind(event.block_height)
        .bind(event.block_time)
        .bind(&event.from_address)
        .bind(event.from_type.as_str())
        .bind(encode_json(event.from_details.as_ref())?)
        .bind(&event.to_address)
        .bind(event.to_type.as_str())
        .bind(encode_json(event.to_details.as_ref())?)
        .bind(event.flow_type.as_str())
        .bind(event.amount)
        .bind(event.classification_level)
        .bind(&event.intermediary_wallet)
        .bind(encode_json(event.hop_chain.as_ref())?)
        .bind(event.analysis_timestamp)
        .bind(event.data_source.as_str())
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch(ex: &mut SqliteConnection, id: i64) -> sqlx::Result<Option<FlowEvent>> {
    let query = format!("SELECT {COLUMNS} FROM flow_events WHERE id = ?1;");
    sqlx::query_as::<_, FlowEventRow>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?
        .map(FlowEvent::try_from)
        .transpose()
}

/// Range scan by block height (inclusive on both ends), newest first.
pub async fn fetch_range(
    ex: &mut SqliteConnection,
    low: i64,
    high: i64,
) -> sqlx::Result<Vec<FlowEvent>> {
    let query = format!(
        "SELECT {COLUMNS} FROM flow_events \
         WHERE block_height >= ?1 AND block_height <= ?2 \
         ORDER BY block_height DESC, id DESC;"
    );
    sqlx::query_as::<_, FlowEventRow>(&query)
        .bind(low)
        .bind(high)
        .fetch_all(ex)
        .await?
        .into_iter()
        .map(FlowEvent::try_from)
        .collect()
}

/// Unclassified events whose destination is unknown (exchange buys whose
/// buyer has not been identified). Events analyzed after `cooldown_cutoff`
/// are excluded until the cooldown expires.
pub async fn unknown_buys(
    ex: &mut SqliteConnection,
    cooldown_cutoff: i64,
    limit: i64,
) -> sqlx::Result<Vec<FlowEvent>> {
    unknown_side(ex, "to_type", cooldown_cutoff, limit).await
}

/// Unclassified events whose source is unknown (exchange sells from an
/// unidentified seller).
pub async fn unknown_sells(
    ex: &mut SqliteConnection,
    cooldown_cutoff: i64,
    limit: i64,
) -> sqlx::Result<Vec<FlowEvent>> {
    unknown_side(ex, "from_type", cooldown_cutoff, limit).await
}

async fn unknown_side(
    ex: &mut SqliteConnection,
    side_column: &str,
    cooldown_cutoff: i64,
    limit: i64,
) -> sqlx::Result<Vec<FlowEvent>> {
    let query = format!(
        "SELECT {COLUMNS} FROM flow_events \
         WHERE classification_level = 0 \
           AND {side_column} = 'unknown' \
           AND (analysis_timestamp IS NULL OR analysis_timestamp < ?1) \
         ORDER BY block_height DESC, id DESC \
         LIMIT ?2;"
    );
    sqlx::query_as::<_, FlowEventRow>(&query)
        .bind(cooldown_cutoff)
        .bind(limit)
        .fetch_all(ex)
        .await?
        .into_iter()
        .map(FlowEvent::try_from)
        .collect()
}

/// Applies the non-`None` fields of the patch to one row. Absent fields keep
/// their stored value, so re-applying a patch is a no-op.
pub async fn update_classification(
    ex: &mut SqliteConnection,
    id: i64,
    patch: &ClassificationPatch,
) -> sqlx::Result<()> {
    const QUERY: &str = "\
        UPDATE flow_events SET \
            classification_level = COALESCE(?2, classification_level), \
            intermediary_wallet = COALESCE(?3, intermediary_wallet), \
            hop_chain = COALESCE(?4, hop_chain), \
            analysis_timestamp = COALESCE(?5, analysis_timestamp), \
            data_source = COALESCE(?6, data_source), \
            from_type = COALESCE(?7, from_type), \
            from_details = COALESCE(?8, from_details), \
            to_type = COALESCE(?9, to_type), \
            to_details = COALESCE(?10, to_details) \
        WHERE id = ?1;";
    sqlx::query(QUERY)
        .bind(id)
        .bind(patch.classification_level)
        .bind(&patch.intermediary_wallet)
        .bind(encode_json(patch.hop_chain.as_ref())?)
        .bind(patch.analysis_timestamp)
        .bind(patch.data_source.map(|source| source.as_str()))
        .bind(patch.from_type.map(|kind| kind.as_str()))
        .bind(encode_json(patch.from_details.as_ref())?)
        .bind(patch.to_type.map(|kind| kind.as_str()))
        .bind(encode_json(patch.to_details.as_ref())?)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn count(ex: &mut SqliteConnection) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM flow_events;")
        .fetch_one(ex)
        .await
}

pub async fn delete_below(ex: &mut SqliteConnection, cutoff: i64) -> sqlx::Result<u64> {
    const QUERY: &str = "DELETE FROM flow_events WHERE block_height < ?1;";
    let result = sqlx::query(QUERY).bind(cutoff).execute(ex).await?;
    Ok(result.rows_affected())
}

fn encode_json<T: Serialize>(value: Option<&T>) -> sqlx::Result<Option<String>> {
    value
        .map(|value| serde_json::to_string(value).map_err(|err| sqlx::Error::Encode(err.into())))
        .transpose()
}

fn decode_json<T: serde::de::DeserializeOwned>(value: Option<&str>) -> sqlx::Result<Option<T>> {
    value
        .map(|value| serde_json::from_str(value).map_err(|err| sqlx::Error::Decode(err.into())))
        .transpose()
}

fn decode_variant<T>(parsed: Option<T>, column: &str, raw: &str) -> sqlx::Result<T> {
    parsed.ok_or_else(|| sqlx::Error::Decode(format!("bad {column} value {raw:?}").into()))
}

#[derive(sqlx::FromRow)]
struct FlowEventRow {
    id: i64,
    txid: String,
    vout: i64,
    block_height: i64,
    block_time: i64,
    from_address: String,
    from_type: String,
    from_details: Option<String>,
    to_address: String,
    to_type: String,
    to_details: Option<String>,
    flow_type: String,
    amount: f64,
    classification_level: i64,
    intermediary_wallet: Option<String>,
    hop_chain: Option<String>,
    analysis_timestamp: Option<i64>,
    data_source: String,
}

impl TryFrom<FlowEventRow> for FlowEvent {
    type Error = sqlx::Error;

    fn try_from(row: FlowEventRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.id,
            txid: row.txid,
            vout: row.vout,
            block_height: row.block_height,
            block_time: row.block_time,
            from_address: row.from_address,
            from_type: decode_variant(
                AddressType::parse(&row.from_type),
                "from_type",
                &row.from_type,
            )?,
            from_details: decode_json::<Details>(row.from_details.as_deref())?,
            to_address: row.to_address,
            to_type: decode_variant(AddressType::parse(&row.to_type), "to_type", &row.to_type)?,
            to_details: decode_json::<Details>(row.to_details.as_deref())?,
            flow_type: decode_variant(
                FlowType::parse(&row.flow_type),
                "flow_type",
                &row.flow_type,
            )?,
            amount: row.amount,
            classification_level: row.classification_level,
            intermediary_wallet: row.intermediary_wallet,
            hop_chain: decode_json::<Vec<String>>(row.hop_chain.as_deref())?,
            analysis_timestamp: row.analysis_timestamp,
            data_source: decode_variant(
                DataSource::parse(&row.data_source),
                "data_source",
                &row.data_source,
            )?,
        })
    }
}
