use std::path::Path;

use rusqlite::{params, Connection};
use serde_json::Value;

use crate::logging;

/// Durable store for raw issue payloads plus the derived reporting tables.
///
/// `IssueCache` is the source of truth: one row per issue key, replaced in
/// place on re-sync, never deleted. The four derived tables are pure
/// projections of it and are dropped and recreated on every rebuild.
#[derive(Debug)]
pub struct CacheStore {
    conn: Connection,
}

/// One raw cache row staged for an atomic page commit.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: String,
    pub updated: String,
    pub content: String,
}

impl CacheStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS IssueCache (
  key TEXT PRIMARY KEY,
  updated TEXT,
  content TEXT
);
",
        )?;

        Ok(Self { conn })
    }

    /// High-watermark over all cached records; `None` when the cache is empty.
    pub fn max_updated(&self) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT MAX(updated) FROM IssueCache", [], |row| row.get(0))
    }

    pub fn record_count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM IssueCache", [], |row| row.get(0))
    }

    /// Raw payload for one key, if cached.
    pub fn content(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT content FROM IssueCache WHERE key = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Writes one fetched page as a single transaction. A crash mid-page
    /// loses at most this page; the sync cursor is recomputed from committed
    /// rows on restart.
    pub fn commit_page(&mut self, records: &[RawRecord]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "REPLACE INTO IssueCache (key, updated, content) VALUES (?1, ?2, ?3)",
                params![record.key, record.updated, record.content],
            )?;
        }
        tx.commit()
    }

    /// Streams `(key, content)` for every cached record.
    pub fn with_records<F, E>(&self, mut handle: F) -> Result<(), E>
    where
        F: FnMut(String, String) -> Result<(), E>,
        E: From<rusqlite::Error>,
    {
        let mut stmt = self.conn.prepare("SELECT key, content FROM IssueCache")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            handle(row.get(0)?, row.get(1)?)?;
        }
        Ok(())
    }

    /// Drops and recreates the four derived tables. Rebuild is wholesale by
    /// contract: no stale derived row survives a field-mapping change.
    pub fn reset_derived_tables(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "
DROP TABLE IF EXISTS Issues;
CREATE TABLE Issues (
  id, key, summary, assignee, creator, updated, status,
  timeoriginalestimate, type, storypoints, priority, resolutiondate,
  PRIMARY KEY (id)
);
DROP TABLE IF EXISTS Users;
CREATE TABLE Users (
  id, emailAddress, displayName, timeZone, active, type,
  PRIMARY KEY (id)
);
DROP TABLE IF EXISTS Worklog;
CREATE TABLE Worklog (
  issueId, authorId, started, timeSpent,
  PRIMARY KEY (issueId, authorId, started, timeSpent)
);
DROP TABLE IF EXISTS IssueLinks;
CREATE TABLE IssueLinks (id, source, relation, destination);
",
        )
    }

    /// Replace-by-primary-key upsert into a derived table. Column names are
    /// sorted so the statement text is stable for a given column set. On
    /// failure the statement and its values are logged before propagating.
    pub fn set_row(&self, table: &str, row: &[(&str, Value)]) -> Result<(), rusqlite::Error> {
        let mut columns: Vec<(&str, &Value)> =
            row.iter().map(|(name, value)| (*name, value)).collect();
        columns.sort_by_key(|(name, _)| *name);

        let names: Vec<String> = columns
            .iter()
            .map(|(name, _)| format!("`{name}`"))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "REPLACE INTO {} ({}) VALUES ({})",
            table,
            names.join(","),
            placeholders.join(",")
        );

        let values: Vec<rusqlite::types::Value> = columns
            .iter()
            .map(|(_, value)| to_sql_value(value))
            .collect();

        if let Err(err) = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
        {
            logging::error(format!(
                "derived upsert failed: sql={} columns={:?} values={:?}: {}",
                sql,
                columns.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
                values,
                err
            ));
            return Err(err);
        }
        Ok(())
    }

    /// Query helper for the renderer's edge lookups.
    pub fn link_rows(
        &self,
        source: &str,
    ) -> Result<Vec<(String, String)>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT relation, destination FROM IssueLinks WHERE source = ?1")?;
        let rows = stmt.query_map(params![source], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(flag) => rusqlite::types::Value::Integer(i64::from(*flag)),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                rusqlite::types::Value::Integer(int)
            } else if let Some(float) = number.as_f64() {
                rusqlite::types::Value::Real(float)
            } else {
                rusqlite::types::Value::Null
            }
        }
        Value::String(text) => rusqlite::types::Value::Text(text.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}
