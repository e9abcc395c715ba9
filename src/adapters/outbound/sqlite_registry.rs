//! SQLite Registry
//!
//! Implements Registry on top of a single SQLite database file.
//! One connection serves every caller; a mutex gives the single-writer
//! discipline and transactions give batch atomicity.

use crate::domain::entities::{now_millis, BackendRecord, BackendSpec, BackendUpdate};
use crate::domain::errors::RegistryError;
use crate::domain::ports::Registry;
use crate::domain::value_objects::Scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

// Timestamps are unix milliseconds. Tables created by the older proxy
// hold `CURRENT_TIMESTAMP` text ("2024-01-01 00:00:00", ISO-8601 with or
// without `Z` or an offset); SQLite's own date parser turns those into
// milliseconds and text it cannot parse reads as 0.
const SELECT_RECORD: &str = "SELECT domain, ip, port, protocol, \
     CASE typeof(created_at) WHEN 'integer' THEN created_at \
         ELSE COALESCE(CAST(round((julianday(created_at) - 2440587.5) * 86400000.0) AS INTEGER), 0) END, \
     CASE typeof(updated_at) WHEN 'integer' THEN updated_at \
         ELSE COALESCE(CAST(round((julianday(updated_at) - 2440587.5) * 86400000.0) AS INTEGER), 0) END \
     FROM domains";

/// SQLite-backed registry.
///
/// Opened once at startup and shared by the dispatcher and the management
/// API. Queries run on the blocking pool; the connection lock is only held
/// inside those blocking sections.
pub struct SqliteRegistry {
    conn: Arc<Mutex<Option<Connection>>>,
    path: String,
}

impl SqliteRegistry {
    /// Open (or create) the registry at `db_path`.
    ///
    /// `:memory:` opens a private in-memory database. For file paths the
    /// parent directory is created if needed.
    pub fn open(db_path: &str) -> Result<Self, RegistryError> {
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(RegistryError::storage)?;
                }
            }
        }

        let conn = Connection::open(db_path).map_err(RegistryError::storage)?;
        Self::init_schema(&conn).map_err(RegistryError::storage)?;

        tracing::info!("registry opened at {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: db_path.to_string(),
        })
    }

    /// In-memory registry, mostly for tests.
    pub fn in_memory() -> Result<Self, RegistryError> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the underlying connection.
    ///
    /// Later operations fail with a storage error. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), RegistryError> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => {
                conn.close().map_err(|(_, e)| RegistryError::storage(e))?;
                tracing::info!("registry closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS domains (
                domain TEXT PRIMARY KEY NOT NULL,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
                protocol TEXT NOT NULL DEFAULT 'http' CHECK (protocol IN ('http', 'https')),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| RegistryError::storage("registry is closed"))?;
            f(conn)
        })
        .await
        .map_err(RegistryError::storage)?
    }

    /// Convert a SQLite row to a BackendRecord.
    ///
    /// This is the single place where stored schemes are normalized.
    fn row_to_record(row: &Row) -> rusqlite::Result<BackendRecord> {
        let protocol: String = row.get(3)?;
        let scheme = Scheme::from_stored(&protocol).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unrecognized protocol {protocol:?}").into(),
            )
        })?;

        let port: i64 = row.get(2)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    Type::Integer,
                    format!("port {port} out of range").into(),
                )
            })?;

        Ok(BackendRecord {
            domain: row.get(0)?,
            address: row.get(1)?,
            port,
            scheme,
            created_at: row.get::<_, i64>(4)?.max(0) as u64,
            updated_at: row.get::<_, i64>(5)?.max(0) as u64,
        })
    }

    fn select_one(conn: &Connection, domain: &str) -> Result<Option<BackendRecord>, RegistryError> {
        conn.query_row(
            &format!("{SELECT_RECORD} WHERE domain = ?1"),
            params![domain],
            Self::row_to_record,
        )
        .optional()
        .map_err(RegistryError::storage)
    }

    fn insert_row(conn: &Connection, spec: &BackendSpec, now: u64) -> Result<BackendRecord, RegistryError> {
        let scheme = spec.scheme.unwrap_or_default();
        let result = conn.execute(
            "INSERT INTO domains (domain, ip, port, protocol, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![spec.domain, spec.address, spec.port, scheme.as_str(), now as i64],
        );

        match result {
            Ok(_) => Ok(BackendRecord {
                domain: spec.domain.clone(),
                address: spec.address.clone(),
                port: spec.port,
                scheme,
                created_at: now,
                updated_at: now,
            }),
            Err(e) if is_duplicate_key(&e) => Err(RegistryError::DuplicateKey(spec.domain.clone())),
            Err(e) => Err(RegistryError::storage(e)),
        }
    }
}

fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn lookup(&self, domain: &str) -> Result<Option<BackendRecord>, RegistryError> {
        let domain = domain.to_string();
        self.with_conn(move |conn| Self::select_one(conn, &domain)).await
    }

    async fn list_all(&self) -> Result<Vec<BackendRecord>, RegistryError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_RECORD} ORDER BY domain"))
                .map_err(RegistryError::storage)?;
            let records = stmt
                .query_map([], Self::row_to_record)
                .map_err(RegistryError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(RegistryError::storage)?;
            Ok(records)
        })
        .await
    }

    async fn insert(&self, spec: BackendSpec) -> Result<BackendRecord, RegistryError> {
        spec.validate()?;
        let record = self
            .with_conn(move |conn| Self::insert_row(conn, &spec, now_millis()))
            .await?;
        tracing::info!(
            "registered {} -> {}://{}",
            record.domain,
            record.scheme,
            record.authority()
        );
        Ok(record)
    }

    async fn update(
        &self,
        domain: &str,
        update: BackendUpdate,
    ) -> Result<Option<BackendRecord>, RegistryError> {
        update.validate()?;
        let domain = domain.to_string();
        let updated = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(RegistryError::storage)?;
                let Some(existing) = Self::select_one(&tx, &domain)? else {
                    return Ok(None);
                };

                let scheme = update.scheme.unwrap_or(existing.scheme);
                let now = now_millis();
                tx.execute(
                    "UPDATE domains SET ip = ?1, port = ?2, protocol = ?3, updated_at = ?4
                     WHERE domain = ?5",
                    params![update.address, update.port, scheme.as_str(), now as i64, domain],
                )
                .map_err(RegistryError::storage)?;
                tx.commit().map_err(RegistryError::storage)?;

                Ok(Some(BackendRecord {
                    domain,
                    address: update.address,
                    port: update.port,
                    scheme,
                    created_at: existing.created_at,
                    updated_at: now,
                }))
            })
            .await?;

        if let Some(record) = &updated {
            tracing::info!(
                "updated {} -> {}://{}",
                record.domain,
                record.scheme,
                record.authority()
            );
        }
        Ok(updated)
    }

    async fn delete(&self, domain: &str) -> Result<(), RegistryError> {
        let domain = domain.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM domains WHERE domain = ?1", params![domain])
                .map_err(RegistryError::storage)?;
            if removed == 0 {
                return Err(RegistryError::NotFound(domain));
            }
            tracing::info!("deleted {}", domain);
            Ok(())
        })
        .await
    }

    async fn bulk_insert(&self, specs: Vec<BackendSpec>) -> Result<Vec<BackendRecord>, RegistryError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        for (index, spec) in specs.iter().enumerate() {
            spec.validate().map_err(|e| e.at_index(index))?;
        }

        {
            let mut seen = HashSet::with_capacity(specs.len());
            if let Some(dup) = specs.iter().find(|s| !seen.insert(s.domain.as_str())) {
                return Err(RegistryError::DuplicateKey(dup.domain.clone()));
            }
        }

        let created = self
            .with_conn(move |conn| {
                // Dropping the transaction on an early return rolls it back.
                let tx = conn.transaction().map_err(RegistryError::storage)?;
                let now = now_millis();
                let created = specs
                    .iter()
                    .map(|spec| Self::insert_row(&tx, spec, now))
                    .collect::<Result<Vec<_>, _>>()?;
                tx.commit().map_err(RegistryError::storage)?;
                Ok(created)
            })
            .await?;

        tracing::info!("bulk registered {} domains", created.len());
        Ok(created)
    }
}
