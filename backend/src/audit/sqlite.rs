use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{AuditCounts, AuditError, AuditReceipt, AuditStore, LinkedSnapshots, Snapshot};
use crate::logging::LogEvent;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS program_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level INTEGER NOT NULL,
    filename TEXT,
    funcname TEXT,
    lineno INTEGER,
    message TEXT NOT NULL,
    module TEXT,
    name TEXT NOT NULL,
    pathname TEXT,
    process INTEGER,
    process_name TEXT,
    thread TEXT,
    thread_name TEXT
);

CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    log_id INTEGER NOT NULL,
    view_args TEXT,
    routing_exception TEXT,
    endpoint TEXT,
    blueprint TEXT,
    blueprints TEXT,
    accept_languages TEXT,
    accept_mimetypes TEXT,
    access_route TEXT,
    args TEXT,
    authorization TEXT,
    base_url TEXT,
    cookies TEXT,
    full_path TEXT,
    host TEXT,
    host_url TEXT,
    url TEXT,
    method TEXT,
    headers TEXT,
    remote_addr TEXT,
    FOREIGN KEY (log_id) REFERENCES program_logs(id)
);

CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL UNIQUE,
    log_id INTEGER NOT NULL,
    expires TEXT,
    location TEXT,
    status TEXT,
    status_code INTEGER,
    headers TEXT,
    response TEXT,
    FOREIGN KEY (log_id) REFERENCES program_logs(id)
);

CREATE INDEX IF NOT EXISTS idx_program_logs_timestamp ON program_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_requests_log_id ON requests(log_id);
CREATE INDEX IF NOT EXISTS idx_responses_log_id ON responses(log_id);
";

/// SQLite-based audit store.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
    path: String,
}

fn db_err(e: rusqlite::Error) -> AuditError {
    AuditError::DatabaseError(e.to_string())
}

/// Fixed-width UTC timestamps, so text comparison matches time order.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteAuditStore {
    /// Open (creating if needed) the database at `database_url` and make
    /// sure the schema exists. Accepts an optional `sqlite:` prefix and
    /// `:memory:`.
    pub fn open(database_url: &str) -> Result<Self, AuditError> {
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AuditError::IoError(e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(db_err)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
        };
        store.ensure_schema()?;

        tracing::info!("Audit store initialized with database: {}", path);
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Names of the user tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(db_err)?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(db_err)?;
        Ok(names)
    }
}

impl AuditStore for SqliteAuditStore {
    fn ensure_schema(&self) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(SCHEMA).map_err(db_err)
    }

    fn record(
        &self,
        event: &LogEvent,
        snapshot: Option<&Snapshot>,
    ) -> Result<AuditReceipt, AuditError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction().map_err(db_err)?;

        tx.execute(
            "INSERT INTO program_logs (timestamp, level, filename, funcname, lineno, message,
                module, name, pathname, process, process_name, thread, thread_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                timestamp(event.timestamp),
                event.level.severity(),
                event.source.filename(),
                // funcname: not known at a track_caller call site
                Option::<String>::None,
                event.source.line,
                event.message,
                event.source.module(),
                event.logger,
                event.source.pathname,
                event.process.id,
                event.process.name,
                event.thread.id,
                event.thread.name,
            ],
        )
        .map_err(db_err)?;
        let log_id = tx.last_insert_rowid();

        let written = match snapshot {
            None => 0,
            Some(Snapshot::Request(request)) => tx
                .execute(
                    "INSERT OR IGNORE INTO requests (id, log_id, view_args, routing_exception,
                        endpoint, blueprint, blueprints, accept_languages, accept_mimetypes,
                        access_route, args, authorization, base_url, cookies, full_path, host,
                        host_url, url, method, headers, remote_addr)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                        ?16, ?17, ?18, ?19, ?20, ?21)",
                    params![
                        request.correlation_id,
                        log_id,
                        request.view_args,
                        request.routing_exception,
                        request.endpoint,
                        request.blueprint,
                        request.blueprints,
                        request.accept_languages,
                        request.accept_mimetypes,
                        request.access_route,
                        request.args,
                        request.authorization,
                        request.base_url,
                        request.cookies,
                        request.full_path,
                        request.host,
                        request.host_url,
                        request.url,
                        request.method,
                        request.headers,
                        request.remote_addr,
                    ],
                )
                .map_err(db_err)?,
            Some(Snapshot::Response(response)) => tx
                .execute(
                    "INSERT OR IGNORE INTO responses (request_id, log_id, expires, location,
                        status, status_code, headers, response)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        response.correlation_id,
                        log_id,
                        response.expires,
                        response.location,
                        response.status,
                        response.status_code,
                        response.headers,
                        response.response,
                    ],
                )
                .map_err(db_err)?,
        };

        tx.commit().map_err(db_err)?;

        tracing::trace!("Recorded audit event {}", log_id);
        Ok(AuditReceipt {
            log_id,
            snapshot_written: written > 0,
        })
    }

    fn counts(&self) -> Result<AuditCounts, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count = |table: &str| -> Result<usize, AuditError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(db_err)
        };

        Ok(AuditCounts {
            events: count("program_logs")?,
            requests: count("requests")?,
            responses: count("responses")?,
        })
    }

    fn snapshots_for(&self, log_id: i64) -> Result<LinkedSnapshots, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let request = conn
            .query_row(
                "SELECT id FROM requests WHERE log_id = ?1",
                params![log_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let response = conn
            .query_row(
                "SELECT id FROM responses WHERE log_id = ?1",
                params![log_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        Ok(LinkedSnapshots { request, response })
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let cutoff = timestamp(cutoff);
        let tx = conn.transaction().map_err(db_err)?;

        for table in ["requests", "responses"] {
            tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE log_id IN
                        (SELECT id FROM program_logs WHERE timestamp < ?1)"
                ),
                params![cutoff],
            )
            .map_err(db_err)?;
        }
        let removed = tx
            .execute("DELETE FROM program_logs WHERE timestamp < ?1", params![cutoff])
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
