use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use rusqlite::{Connection, OptionalExtension, Statement, Transaction, TransactionBehavior, params};
use tracing::debug;

use crate::config::StoreSettings;
use crate::domain::{BulkMode, Document, IndexDescriptor, NaturalKey};
use crate::error::IngestError;

use super::{
    BulkWriteResult, DocumentStore, StoreConnection, UpdateRequest, apply_set, bulk_error,
};

/// Embedded JSON document store: one table per collection, one document per row.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: Utf8PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new(settings: &StoreSettings) -> Self {
        Self {
            path: settings.path.clone(),
            busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
        }
    }

    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(60),
        }
    }
}

impl DocumentStore for SqliteStore {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection, IngestError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| IngestError::StoreConnect(err.to_string()))?;
            }
        }
        let conn = Connection::open(self.path.as_std_path())
            .map_err(|err| IngestError::StoreConnect(err.to_string()))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|err| IngestError::StoreConnect(err.to_string()))?;
        let journal: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|err| IngestError::StoreConnect(err.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| IngestError::StoreConnect(err.to_string()))?;
        debug!(path = %self.path, journal = %journal, "opened store connection");
        Ok(SqliteConnection { conn })
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

pub struct SqliteConnection {
    conn: Connection,
}

enum UpdateOutcome {
    Unmatched,
    Matched { modified: bool },
}

impl SqliteConnection {
    fn ensure_table(&self, collection: &str) -> Result<(), IngestError> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL)",
                quote_ident(collection)
            ))
            .map_err(store_err)
    }

    /// Takes the write lock at BEGIN so that lock waits honour the busy timeout.
    fn write_transaction(&mut self) -> Result<Transaction<'_>, IngestError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)
    }
}

impl StoreConnection for SqliteConnection {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, IngestError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count > 0)
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), IngestError> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(collection)))
            .map_err(store_err)
    }

    fn insert_many(
        &mut self,
        collection: &str,
        documents: &[Document],
        mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError> {
        let mut result = BulkWriteResult::attempted(documents.len());
        if documents.is_empty() {
            return Ok(result);
        }
        self.ensure_table(collection)?;
        let sql = format!("INSERT INTO {} (doc) VALUES (?1)", quote_ident(collection));

        let tx = self.write_transaction()?;
        {
            let mut stmt = tx.prepare(&sql).map_err(store_err)?;
            for (position, document) in documents.iter().enumerate() {
                let outcome = serde_json::to_string(document)
                    .map_err(|err| err.to_string())
                    .and_then(|json| stmt.execute(params![json]).map_err(|err| err.to_string()));
                match outcome {
                    Ok(_) => result.inserted += 1,
                    Err(message) => {
                        let message = format!("document {position}: {message}");
                        if mode == BulkMode::Ordered {
                            return Err(bulk_error(collection, documents.len(), message));
                        }
                        result.errors.push(message);
                    }
                }
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(result)
    }

    fn bulk_update(
        &mut self,
        collection: &str,
        requests: &[UpdateRequest],
        mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError> {
        let mut result = BulkWriteResult::attempted(requests.len());
        if requests.is_empty() || !self.collection_exists(collection)? {
            return Ok(result);
        }
        let table = quote_ident(collection);
        let select = format!(
            "SELECT id, doc FROM {table} WHERE {} = ?1 AND {} = ?2 AND {} = ?3 ORDER BY id LIMIT 1",
            field_expr("xpos"),
            field_expr("ref"),
            field_expr("alt"),
        );
        let update = format!("UPDATE {table} SET doc = ?1 WHERE id = ?2");

        let tx = self.write_transaction()?;
        {
            let mut select_stmt = tx.prepare(&select).map_err(store_err)?;
            let mut update_stmt = tx.prepare(&update).map_err(store_err)?;
            for (position, request) in requests.iter().enumerate() {
                match apply_one(&mut select_stmt, &mut update_stmt, request) {
                    Ok(UpdateOutcome::Unmatched) => {}
                    Ok(UpdateOutcome::Matched { modified }) => {
                        result.matched += 1;
                        if modified {
                            result.modified += 1;
                        }
                    }
                    Err(message) => {
                        let message = format!("update {position} ({}): {message}", request.key);
                        if mode == BulkMode::Ordered {
                            return Err(bulk_error(collection, requests.len(), message));
                        }
                        result.errors.push(message);
                    }
                }
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(result)
    }

    fn create_indexes(
        &mut self,
        collection: &str,
        indexes: &[IndexDescriptor],
    ) -> Result<(), IngestError> {
        self.ensure_table(collection)?;
        let table = quote_ident(collection);
        for index in indexes {
            validate_field(&index.field)?;
            let unique = if index.unique { "UNIQUE " } else { "" };
            let name = quote_ident(&index_name(collection, &index.field));
            self.conn
                .execute_batch(&format!(
                    "CREATE {unique}INDEX IF NOT EXISTS {name} ON {table} ({})",
                    field_expr(&index.field)
                ))
                .map_err(store_err)?;
        }
        Ok(())
    }

    fn count(&mut self, collection: &str) -> Result<u64, IngestError> {
        if !self.collection_exists(collection)? {
            return Ok(0);
        }
        let count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(collection)),
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    fn count_duplicate_keys(&mut self, collection: &str) -> Result<u64, IngestError> {
        if !self.collection_exists(collection)? {
            return Ok(0);
        }
        let [xpos, ref_allele, alt] = NaturalKey::FIELDS.map(field_expr);
        let surplus: i64 = self
            .conn
            .query_row(
                &format!(
                    "SELECT COALESCE(SUM(n - 1), 0) FROM (SELECT COUNT(*) AS n FROM {} \
                     WHERE {xpos} IS NOT NULL GROUP BY {xpos}, {ref_allele}, {alt} HAVING COUNT(*) > 1)",
                    quote_ident(collection)
                ),
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(surplus.max(0) as u64)
    }
}

fn apply_one(
    select: &mut Statement<'_>,
    update: &mut Statement<'_>,
    request: &UpdateRequest,
) -> Result<UpdateOutcome, String> {
    let key = &request.key;
    let found: Option<(i64, String)> = select
        .query_row(params![key.xpos, key.ref_allele, key.alt], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()
        .map_err(|err| err.to_string())?;
    let Some((id, raw)) = found else {
        return Ok(UpdateOutcome::Unmatched);
    };

    let mut document: Document = serde_json::from_str(&raw).map_err(|err| err.to_string())?;
    if !apply_set(&mut document, &request.set) {
        return Ok(UpdateOutcome::Matched { modified: false });
    }
    let json = serde_json::to_string(&document).map_err(|err| err.to_string())?;
    update
        .execute(params![json, id])
        .map_err(|err| err.to_string())?;
    Ok(UpdateOutcome::Matched { modified: true })
}

fn store_err(err: rusqlite::Error) -> IngestError {
    IngestError::Store(err.to_string())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// The select used by updates and the index definitions must render the
// same expression text, otherwise SQLite will not use the index.
fn field_expr(field: &str) -> String {
    format!("json_extract(doc, '$.{field}')")
}

fn validate_field(field: &str) -> Result<(), IngestError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(IngestError::Store(format!("invalid index field: {field}")))
    }
}

fn index_name(collection: &str, field: &str) -> String {
    let collection: String = collection
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    format!("idx_{collection}_{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("/igv_cache"), "\"/igv_cache\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(index_name("/igv_cache", "name"), "idx__igv_cache_name");
    }

    #[test]
    fn index_fields_are_validated() {
        assert!(validate_field("quality_metrics").is_ok());
        assert!(validate_field("x') --").is_err());
    }
}
