//! Transactional storage for the journal.
//!
//! The embedded driver is a single SQLite file opened in WAL mode with one
//! writer connection behind a mutex and a small pool of read-only
//! connections, so readers never queue behind a write. Every mutation goes
//! through a [`Tx`]: the first failing step rolls the transaction back and
//! records why, and everything issued afterwards (commit included) fails
//! with [`Error::TxAborted`].
//!
//! The networked driver is recognised and its DSN and DDL are produced, but
//! no networked engine is linked into this build.

use crate::types::{LogColumn, NameType};
use crate::{Context, Error, Result};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const LOG_TABLE: &str = "userLogs";
pub const SETTINGS_TABLE: &str = "userSettings";

/// Busy timeout for connections contending on the database file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Number of read-only connections
const READ_POOL_SIZE: usize = 4;
/// VM steps between deadline checks of a running statement
const PROGRESS_OPS: i32 = 1_000;

// ============================================================================
// Drivers
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbDriver {
    /// Embedded single-file engine
    #[default]
    #[serde(rename = "sqlite3", alias = "sqlite")]
    Sqlite,
    /// Networked engine
    #[serde(rename = "mysql")]
    Mysql,
}

/// Connection string of the form `user:password@host:port/database`
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkedDsn {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl fmt::Debug for NetworkedDsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedDsn")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for NetworkedDsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl FromStr for NetworkedDsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| {
            Error::Config(format!(
                "DBConnection must look like user:password@host:port/database ({})",
                why
            ))
        };
        let (credentials, location) = s.rsplit_once('@').ok_or_else(|| invalid("missing '@'"))?;
        let (user, password) = credentials
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' between user and password"))?;
        let (address, database) = location
            .split_once('/')
            .ok_or_else(|| invalid("missing '/database'"))?;
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing ':port'"))?;
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
        if user.is_empty() || host.is_empty() || database.is_empty() {
            return Err(invalid("empty user, host or database"));
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
        })
    }
}

/// Where the store lives; the one place the driver is chosen
#[derive(Clone, Debug)]
pub enum StoreLocation {
    Embedded(PathBuf),
    Networked(NetworkedDsn),
}

impl StoreLocation {
    pub fn from_config(config: &crate::Config) -> Result<Self> {
        match config.db_driver {
            DbDriver::Sqlite => Ok(StoreLocation::Embedded(config.db_path.clone())),
            DbDriver::Mysql => Ok(StoreLocation::Networked(config.networked_dsn()?)),
        }
    }

    pub fn driver(&self) -> DbDriver {
        match self {
            StoreLocation::Embedded(_) => DbDriver::Sqlite,
            StoreLocation::Networked(_) => DbDriver::Mysql,
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Table and source names are interpolated into SQL, so they are limited
/// to ASCII alphanumerics and underscores.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Name of the source-specific overlay table for a name type
pub fn overlay_table(name_type: NameType, source: &str) -> String {
    format!("{}_{}", name_type.table_name(), source)
}

/// Every alt-names table: the four globals, then the four overlays
pub fn alt_names_tables(source: &str) -> Vec<String> {
    let mut tables: Vec<String> = NameType::ALL
        .iter()
        .map(|nt| nt.table_name().to_string())
        .collect();
    tables.extend(NameType::ALL.iter().map(|nt| overlay_table(*nt, source)));
    tables
}

fn nocase(driver: DbDriver) -> &'static str {
    match driver {
        DbDriver::Sqlite => " COLLATE NOCASE",
        DbDriver::Mysql => "",
    }
}

pub fn info_table_ddl(driver: DbDriver, source: &str) -> String {
    let nc = nocase(driver);
    format!(
        "CREATE TABLE IF NOT EXISTS {source} (
            drugName VARCHAR(255) NOT NULL{nc},
            drugRoute VARCHAR(255) NOT NULL{nc},
            threshold REAL NOT NULL DEFAULT 0,
            lowDoseMin REAL NOT NULL DEFAULT 0,
            lowDoseMax REAL NOT NULL DEFAULT 0,
            mediumDoseMin REAL NOT NULL DEFAULT 0,
            mediumDoseMax REAL NOT NULL DEFAULT 0,
            highDoseMin REAL NOT NULL DEFAULT 0,
            highDoseMax REAL NOT NULL DEFAULT 0,
            doseUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            onsetMin REAL NOT NULL DEFAULT 0,
            onsetMax REAL NOT NULL DEFAULT 0,
            onsetUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            comeUpMin REAL NOT NULL DEFAULT 0,
            comeUpMax REAL NOT NULL DEFAULT 0,
            comeUpUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            peakMin REAL NOT NULL DEFAULT 0,
            peakMax REAL NOT NULL DEFAULT 0,
            peakUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            offsetMin REAL NOT NULL DEFAULT 0,
            offsetMax REAL NOT NULL DEFAULT 0,
            offsetUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            totalDurMin REAL NOT NULL DEFAULT 0,
            totalDurMax REAL NOT NULL DEFAULT 0,
            totalDurUnits VARCHAR(255) NOT NULL DEFAULT ''{nc},
            timeOfFetch BIGINT NOT NULL,
            PRIMARY KEY (drugName, drugRoute)
        )"
    )
}

pub fn alt_names_ddl(driver: DbDriver, table: &str) -> String {
    let nc = nocase(driver);
    let id = match driver {
        DbDriver::Sqlite => "id INTEGER PRIMARY KEY",
        DbDriver::Mysql => "id BIGINT AUTO_INCREMENT PRIMARY KEY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            {id},
            localName VARCHAR(255) NOT NULL{nc},
            alternativeName VARCHAR(255) NOT NULL{nc},
            UNIQUE (localName, alternativeName)
        )"
    )
}

/// Full schema, idempotent
pub fn schema_statements(driver: DbDriver, source: &str) -> Vec<String> {
    let nc = nocase(driver);
    let mut statements = vec![
        info_table_ddl(driver, source),
        format!(
            "CREATE TABLE IF NOT EXISTS {LOG_TABLE} (
                timeOfDoseStart BIGINT NOT NULL,
                username VARCHAR(255) NOT NULL{nc},
                timeOfDoseEnd BIGINT NOT NULL DEFAULT 0,
                drugName VARCHAR(255) NOT NULL{nc},
                dose REAL NOT NULL,
                doseUnits VARCHAR(255) NOT NULL{nc},
                drugRoute VARCHAR(255) NOT NULL{nc},
                cost REAL NOT NULL DEFAULT 0,
                costCurrency VARCHAR(255) NOT NULL DEFAULT ''{nc},
                PRIMARY KEY (username, timeOfDoseStart)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (
                username VARCHAR(255) NOT NULL{nc} PRIMARY KEY,
                useIDForRemember BIGINT NOT NULL DEFAULT 0
            )"
        ),
    ];
    statements.extend(
        alt_names_tables(source)
            .iter()
            .map(|table| alt_names_ddl(driver, table)),
    );
    statements
}

/// Comma-separated log columns in schema order, for SELECTs
pub fn log_columns_sql() -> String {
    LogColumn::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct Store {
    driver: DbDriver,
    source: String,
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
    readers: Arc<Vec<Mutex<Connection>>>,
    read_cursor: Arc<AtomicUsize>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("driver", &self.driver)
            .field("source", &self.source)
            .field("path", &self.path)
            .finish()
    }
}

impl Store {
    /// Open the store at `location`, creating the schema for `source`
    pub fn open(location: &StoreLocation, source: &str) -> Result<Self> {
        if !is_valid_identifier(source) {
            return Err(Error::Config(format!(
                "source name {:?} is not a valid table name",
                source
            )));
        }
        match location {
            StoreLocation::Embedded(path) => Self::open_embedded(path, source),
            StoreLocation::Networked(dsn) => Err(Error::UnsupportedDriver(dsn.to_string())),
        }
    }

    fn open_embedded(path: &Path, source: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = open_connection(path, false)?;
        initialize_schema(&mut writer, DbDriver::Sqlite, source)?;

        let readers = (0..READ_POOL_SIZE)
            .map(|_| open_connection(path, true).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Opened store {:?} for source {}", path, source);
        Ok(Self {
            driver: DbDriver::Sqlite,
            source: source.to_string(),
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
            read_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn driver(&self) -> DbDriver {
        self.driver
    }

    /// Active source; also the name of the info table
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info_table(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a write transaction. Transactions are serialised per store.
    pub fn begin(&self, ctx: &Context, component: &'static str) -> Result<Tx<'_>> {
        ctx.check()?;
        let conn = self
            .writer
            .lock()
            .map_err(|_| Error::Other("store writer mutex poisoned".into()))?;
        ctx.check()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| map_db_error(ctx, component, err))?;
        conn.progress_handler(PROGRESS_OPS, Some(ctx.interrupt_handler()));
        Ok(Tx {
            conn,
            ctx: ctx.clone(),
            component,
            open: true,
            failure: None,
        })
    }

    /// Run `f` inside a transaction, committing on success and rolling back
    /// on the first error.
    pub fn write<T, F>(&self, ctx: &Context, component: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T>,
    {
        let mut tx = self.begin(ctx, component)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => Err(tx.fail(err)),
        }
    }

    /// Run a read on one of the read-only connections
    pub fn read<T, F>(&self, ctx: &Context, component: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        ctx.check()?;
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index]
            .lock()
            .map_err(|_| Error::Other("store reader mutex poisoned".into()))?;
        ctx.check()?;
        conn.progress_handler(PROGRESS_OPS, Some(ctx.interrupt_handler()));
        let result = f(&*conn);
        clear_progress_handler(&conn);
        result.map_err(|err| map_db_error(ctx, component, err))
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// An open write transaction holding the writer connection
pub struct Tx<'s> {
    conn: MutexGuard<'s, Connection>,
    ctx: Context,
    component: &'static str,
    open: bool,
    failure: Option<String>,
}

impl<'s> Tx<'s> {
    fn ensure_usable(&mut self) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(Error::TxAborted(reason.clone()));
        }
        if !self.open {
            return Err(Error::TxAborted("transaction already finished".into()));
        }
        if let Err(err) = self.ctx.check() {
            return Err(self.fail(err));
        }
        Ok(())
    }

    fn db_failure(&mut self, err: rusqlite::Error) -> Error {
        let err = map_db_error(&self.ctx, self.component, err);
        self.fail(err)
    }

    /// Compile a statement ahead of use
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        self.ensure_usable()?;
        let result = self.conn.prepare_cached(sql).map(|_| ());
        result.map_err(|err| self.db_failure(err))
    }

    pub fn exec<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        self.ensure_usable()?;
        let result = execute(&self.conn, sql, params);
        result.map_err(|err| self.db_failure(err))
    }

    pub fn query_row<T, P, F>(&mut self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ensure_usable()?;
        let result = optional_row(&self.conn, sql, params, f);
        result.map_err(|err| self.db_failure(err))
    }

    pub fn query_rows<T, P, F>(&mut self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ensure_usable()?;
        let result = collect_rows(&self.conn, sql, params, f);
        result.map_err(|err| self.db_failure(err))
    }

    /// Record `err` as the reason this transaction failed, roll back, and
    /// hand the error back for propagation. Only the first failure is kept.
    pub fn fail(&mut self, err: Error) -> Error {
        if self.failure.is_none() {
            self.failure = Some(err.to_string());
        }
        self.finish("ROLLBACK");
        err
    }

    /// Reason recorded by the first failure, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn commit(mut self) -> Result<()> {
        self.ensure_usable()?;
        clear_progress_handler(&self.conn);
        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                self.open = false;
                Ok(())
            }
            Err(err) => Err(self.db_failure(err)),
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        clear_progress_handler(&self.conn);
        self.open = false;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|err| map_db_error(&self.ctx, self.component, err))
    }

    fn finish(&mut self, statement: &str) {
        if !self.open {
            return;
        }
        clear_progress_handler(&self.conn);
        self.open = false;
        if let Err(err) = self.conn.execute_batch(statement) {
            // An interrupted statement may already have ended the transaction.
            tracing::debug!("{} on {} failed: {}", statement, self.component, err);
        }
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!(
                "Transaction on {} dropped without commit, rolling back",
                self.component
            );
            self.finish("ROLLBACK");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn execute<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.execute(params)
}

pub(crate) fn optional_row<T, P, F>(
    conn: &Connection,
    sql: &str,
    params: P,
    f: F,
) -> rusqlite::Result<Option<T>>
where
    P: Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.query_row(params, f).optional()
}

pub(crate) fn collect_rows<T, P, F>(
    conn: &Connection,
    sql: &str,
    params: P,
    f: F,
) -> rusqlite::Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, f)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn clear_progress_handler(conn: &Connection) {
    conn.progress_handler(0, None::<fn() -> bool>);
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}

/// Translate a driver error, tagging it with the observing component
pub(crate) fn map_db_error(ctx: &Context, component: &'static str, err: rusqlite::Error) -> Error {
    if is_interrupt(&err) {
        return ctx.interruption();
    }
    Error::Store {
        component,
        message: err.to_string(),
    }
}

fn open_connection(path: &Path, read_only: bool) -> Result<Connection> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let db_err = |err: rusqlite::Error| Error::Store {
        component: "store",
        message: err.to_string(),
    };
    let connection = Connection::open_with_flags(path, flags).map_err(db_err)?;
    connection.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
    if !read_only {
        connection
            .execute_batch("PRAGMA journal_mode = wal;")
            .map_err(db_err)?;
        connection
            .execute_batch("PRAGMA synchronous = normal;")
            .map_err(db_err)?;
    }
    Ok(connection)
}

fn initialize_schema(connection: &mut Connection, driver: DbDriver, source: &str) -> Result<()> {
    let db_err = |err: rusqlite::Error| Error::Store {
        component: "store",
        message: err.to_string(),
    };
    let tx = connection
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(db_err)?;
    for statement in schema_statements(driver, source) {
        tx.execute_batch(&statement).map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}
