// ABOUTME: Applies deletes and upserts to the target database transactionally
// ABOUTME: Builds parameterized DML and validates key columns before execution

use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::error::ReplicationError;

/// PostgreSQL allows ~65535 parameters per statement; leave some margin.
const MAX_PARAMS: usize = 65_000;

/// Keys deleted per statement inside the delete transaction.
const DELETE_CHUNK: usize = 1000;

/// An upsert batch built transiently for one sync cycle.
pub struct ApplyBatch {
    /// Column names in the order values appear in each row
    pub columns: Vec<String>,
    /// Unique key column driving conflict resolution
    pub key_column: String,
    pub rows: Vec<Vec<Box<dyn ToSql + Sync + Send>>>,
}

impl ApplyBatch {
    /// The key column must be among the declared columns; otherwise the
    /// generated statement would be malformed.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        if self.columns.is_empty() {
            return Err(ReplicationError::PermanentConfig(
                "upsert batch has no columns".to_string(),
            ));
        }
        if !self.columns.contains(&self.key_column) {
            return Err(ReplicationError::PermanentConfig(format!(
                "key column '{}' is not among the declared columns",
                self.key_column
            )));
        }
        Ok(())
    }
}

/// Executes delete and upsert DML against the target.
///
/// Each operation owns its own transaction scope: a delete set commits or
/// rolls back as a whole, and so does an upsert batch. No transaction spans
/// both steps; the engine's delete-before-upsert ordering makes that safe.
pub struct TargetApplier<'a> {
    client: &'a mut Client,
}

impl<'a> TargetApplier<'a> {
    pub fn new(client: &'a mut Client) -> Self {
        Self { client }
    }

    /// Delete all rows whose key matches one of `keys`, in a single
    /// transaction. Any failure rolls back the entire delete set; there is no
    /// automatic retry.
    pub async fn apply_deletes(
        &mut self,
        schema: &str,
        table: &str,
        key_column: &str,
        keys: &[String],
    ) -> Result<u64, ReplicationError> {
        if keys.is_empty() {
            tracing::debug!("No deleted keys to apply for {}.{}", schema, table);
            return Ok(0);
        }

        let tx = self
            .client
            .transaction()
            .await
            .map_err(|e| ReplicationError::apply("delete begin", e))?;

        let mut deleted = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let query = build_delete_query(schema, table, key_column, chunk.len());
            let params: Vec<&(dyn ToSql + Sync)> =
                chunk.iter().map(|k| k as &(dyn ToSql + Sync)).collect();
            deleted += tx
                .execute(&query, &params)
                .await
                .map_err(|e| ReplicationError::apply("delete", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| ReplicationError::apply("delete commit", e))?;

        tracing::info!(
            "Deleted {} rows from {}.{} ({} ledger keys)",
            deleted,
            schema,
            table,
            keys.len()
        );
        Ok(deleted)
    }

    /// Upsert a batch keyed by its key column, in a single transaction.
    ///
    /// Every non-key column is overwritten with the incoming value
    /// (last-writer-wins). Statements are chunked to stay under the parameter
    /// limit, but all chunks commit or roll back together.
    pub async fn apply_upsert(
        &mut self,
        schema: &str,
        table: &str,
        batch: &ApplyBatch,
    ) -> Result<u64, ReplicationError> {
        batch.validate()?;
        if batch.rows.is_empty() {
            tracing::debug!("No rows to upsert into {}.{}", schema, table);
            return Ok(0);
        }

        let rows_per_chunk = std::cmp::max(1, MAX_PARAMS / batch.columns.len());

        let tx = self
            .client
            .transaction()
            .await
            .map_err(|e| ReplicationError::apply("upsert begin", e))?;

        let mut affected = 0u64;
        for chunk in batch.rows.chunks(rows_per_chunk) {
            let query = build_upsert_query(
                schema,
                table,
                &batch.key_column,
                &batch.columns,
                chunk.len(),
            );
            let params: Vec<&(dyn ToSql + Sync)> = chunk
                .iter()
                .flat_map(|row| row.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)))
                .collect();
            affected += tx
                .execute(&query, &params)
                .await
                .map_err(|e| ReplicationError::apply("upsert", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| ReplicationError::apply("upsert commit", e))?;

        tracing::info!("Upserted {} rows into {}.{}", affected, schema, table);
        Ok(affected)
    }
}

/// Quote identifiers to handle reserved words and special characters.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build an upsert query for the given columns and batch size.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "name", "updated_at")
/// VALUES ($1, $2, $3), ($4, $5, $6)
/// ON CONFLICT ("id") DO UPDATE SET
///   "name" = EXCLUDED."name",
///   "updated_at" = EXCLUDED."updated_at"
/// ```
fn build_upsert_query(
    schema: &str,
    table: &str,
    key_column: &str,
    columns: &[String],
    num_rows: usize,
) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != key_column)
        .map(|c| format!("{} = EXCLUDED.{}", quote_identifier(c), quote_identifier(c)))
        .collect();

    let update_clause = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {}.{} ({}) VALUES {} ON CONFLICT ({}) {}",
        quote_identifier(schema),
        quote_identifier(table),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quote_identifier(key_column),
        update_clause
    )
}

/// Build a delete query matching ledger keys against the key column.
///
/// Ledger keys arrive as text, so the key column is compared in its text
/// form:
/// ```sql
/// DELETE FROM "schema"."table" WHERE "id"::text IN ($1, $2, $3)
/// ```
fn build_delete_query(schema: &str, table: &str, key_column: &str, num_keys: usize) -> String {
    let placeholders: Vec<String> = (1..=num_keys).map(|i| format!("${}", i)).collect();
    format!(
        "DELETE FROM {}.{} WHERE {}::text IN ({})",
        quote_identifier(schema),
        quote_identifier(table),
        quote_identifier(key_column),
        placeholders.join(", ")
    )
}

/// Extract column metadata (name, data type) for a table, in ordinal order.
pub async fn get_table_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<(String, String)>, ReplicationError> {
    let rows = client
        .query(
            "SELECT column_name, data_type
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .map_err(|e| ReplicationError::apply("describe", e))?;

    Ok(rows
        .iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect())
}

/// Convert a fetched source row into boxed parameter values, preserving the
/// native type wherever tokio-postgres maps it; everything else falls back to
/// its text form.
pub fn row_to_values(
    row: &Row,
    column_types: &[(String, String)],
) -> Vec<Box<dyn ToSql + Sync + Send>> {
    column_types
        .iter()
        .enumerate()
        .map(|(idx, (_name, dtype))| -> Box<dyn ToSql + Sync + Send> {
            match dtype.as_str() {
                "smallint" | "int2" => Box::new(row.get::<_, Option<i16>>(idx)),
                "integer" | "int4" => Box::new(row.get::<_, Option<i32>>(idx)),
                "bigint" | "int8" => Box::new(row.get::<_, Option<i64>>(idx)),
                "real" | "float4" => Box::new(row.get::<_, Option<f32>>(idx)),
                "double precision" | "float8" => Box::new(row.get::<_, Option<f64>>(idx)),
                "boolean" | "bool" => Box::new(row.get::<_, Option<bool>>(idx)),
                "text" | "varchar" | "character varying" | "char" | "character" | "name" => {
                    Box::new(row.get::<_, Option<String>>(idx))
                }
                "uuid" => Box::new(row.get::<_, Option<uuid::Uuid>>(idx)),
                "timestamp without time zone" | "timestamp" => {
                    Box::new(row.get::<_, Option<chrono::NaiveDateTime>>(idx))
                }
                "timestamp with time zone" | "timestamptz" => {
                    Box::new(row.get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx))
                }
                "date" => Box::new(row.get::<_, Option<chrono::NaiveDate>>(idx)),
                "json" | "jsonb" => Box::new(row.get::<_, Option<serde_json::Value>>(idx)),
                "bytea" => Box::new(row.get::<_, Option<Vec<u8>>>(idx)),
                _ => Box::new(row.try_get::<_, String>(idx).ok()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(columns: &[&str], key: &str) -> ApplyBatch {
        ApplyBatch {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            key_column: key.to_string(),
            rows: Vec::new(),
        }
    }

    #[test]
    fn test_validate_accepts_key_among_columns() {
        assert!(batch(&["id", "name"], "id").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_key_column() {
        let result = batch(&["name", "email"], "id").validate();
        assert!(matches!(result, Err(ReplicationError::PermanentConfig(_))));
    }

    #[test]
    fn test_validate_rejects_empty_columns() {
        assert!(batch(&[], "id").validate().is_err());
    }

    #[test]
    fn test_build_upsert_query_single_row() {
        let query = build_upsert_query(
            "public",
            "users",
            "id",
            &["id".to_string(), "name".to_string(), "email".to_string()],
            1,
        );

        assert!(query.contains("INSERT INTO \"public\".\"users\""));
        assert!(query.contains("(\"id\", \"name\", \"email\")"));
        assert!(query.contains("VALUES ($1, $2, $3)"));
        assert!(query.contains("ON CONFLICT (\"id\")"));
        assert!(query.contains("\"name\" = EXCLUDED.\"name\""));
        assert!(query.contains("\"email\" = EXCLUDED.\"email\""));
        assert!(!query.contains("\"id\" = EXCLUDED.\"id\""));
    }

    #[test]
    fn test_build_upsert_query_multiple_rows() {
        let query = build_upsert_query(
            "public",
            "users",
            "id",
            &["id".to_string(), "name".to_string()],
            3,
        );
        assert!(query.contains("($1, $2), ($3, $4), ($5, $6)"));
    }

    #[test]
    fn test_build_upsert_query_key_only_does_nothing() {
        let query = build_upsert_query("public", "tags", "id", &["id".to_string()], 1);
        assert!(query.contains("DO NOTHING"));
        assert!(!query.contains("DO UPDATE SET"));
    }

    #[test]
    fn test_build_delete_query_casts_key_to_text() {
        let query = build_delete_query("public", "users", "id", 3);
        assert_eq!(
            query,
            "DELETE FROM \"public\".\"users\" WHERE \"id\"::text IN ($1, $2, $3)"
        );
    }

    #[test]
    fn test_quote_identifier_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("order\"items"), "\"order\"\"items\"");
    }
}
