//! C4 — Content store. One row per unique body, keyed by content hash;
//! inserted with insert-ignore-on-conflict semantics (spec.md §4.4).

use sqlx::PgPool;

use crate::Result;

pub async fn upsert(pool: &PgPool, content_hash: &str, text_body: &str, raw_headers: &str) -> Result<()> {
    upsert_tx(pool, content_hash, text_body, raw_headers).await
}

pub async fn upsert_tx<'e, E>(executor: E, content_hash: &str, text_body: &str, raw_headers: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO content (content_hash, text_body, raw_headers)
         VALUES ($1, $2, $3)
         ON CONFLICT (content_hash) DO NOTHING",
    )
    .bind(content_hash)
    .bind(text_body)
    .bind(raw_headers)
    .execute(executor)
    .await?;
    Ok(())
}

/// Of the given hashes, which already have a `content` row.
pub async fn find_existing(pool: &PgPool, hashes: &[String]) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT content_hash FROM content WHERE content_hash = ANY($1)")
            .bind(hashes)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(h,)| h).collect())
}

/// Only invoked by the GC coordinator (C11), after confirming no
/// non-expunged message still references `content_hash`.
pub async fn delete<'e, E>(executor: E, content_hash: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query("DELETE FROM content WHERE content_hash = $1")
        .bind(content_hash)
        .execute(executor)
        .await?;
    Ok(())
}
