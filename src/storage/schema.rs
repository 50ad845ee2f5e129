use rusqlite::{Connection, Result};
use std::collections::HashMap;

/// Database schema version - increment when making schema changes
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Schema migration manager for the SQLite database
pub struct SchemaMigrator {
    connection: Connection,
}

impl SchemaMigrator {
    /// Creates a new schema migrator with the given database connection
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Runs all necessary migrations to bring the database to the current schema version
    pub fn migrate(&mut self) -> Result<()> {
        self.ensure_migration_table()?;
        let current_version = self.get_current_version()?;

        if current_version < CURRENT_SCHEMA_VERSION {
            self.run_migrations_from(current_version)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Returns the current schema version of the database
    pub fn get_current_version(&self) -> Result<i32> {
        let version: Result<i32> = self.connection.query_row(
            "SELECT version FROM schema_migrations ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        );

        match version {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::SqliteFailure(_, _)) => Ok(0), // No migrations table yet
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Creates the schema_migrations table if it doesn't exist
    fn ensure_migration_table(&self) -> Result<()> {
        self.connection.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Records a schema version as applied
    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.connection.execute(
            "INSERT OR REPLACE INTO schema_migrations (version) VALUES (?1)",
            [version],
        )?;
        Ok(())
    }

    /// Runs all migrations starting from the given version
    fn run_migrations_from(&mut self, from_version: i32) -> Result<()> {
        let migrations = self.get_migrations();

        for version in (from_version + 1)..=CURRENT_SCHEMA_VERSION {
            if let Some(migration_sql) = migrations.get(&version) {
                self.connection.execute_batch(migration_sql)?;
            }
        }

        Ok(())
    }

    /// Returns a map of version -> SQL migration statements
    fn get_migrations(&self) -> HashMap<i32, &'static str> {
        let mut migrations = HashMap::new();

        // Migration 1: Initial schema
        migrations.insert(1, MIGRATION_V1);

        migrations
    }

    /// Returns a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Consumes the migrator and returns the connection
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

/// Migration V1: Initial schema with all core tables
const MIGRATION_V1: &str = r#"
-- Author profiles keyed by ORCID iD
CREATE TABLE authors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    orcidid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    facts TEXT NOT NULL DEFAULT '{}',  -- JSON object of harvested fields
    status TEXT CHECK (status IN ('blacklisted', 'postponed')),
    account_id INTEGER,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE INDEX idx_authors_orcidid ON authors(orcidid);

-- Append-only claims log
CREATE TABLE claims (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    orcidid TEXT NOT NULL,
    bibcode TEXT NOT NULL DEFAULT '',  -- empty for #full-import sentinels
    status TEXT NOT NULL CHECK (status IN ('claimed', 'updated', 'removed', 'unchanged', 'forced', '#full-import')),
    provenance TEXT NOT NULL DEFAULT '',
    created TEXT NOT NULL
);

CREATE INDEX idx_claims_orcidid_created ON claims(orcidid, created);
CREATE INDEX idx_claims_bibcode ON claims(bibcode);

-- Per-bibcode claim arrays
CREATE TABLE records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bibcode TEXT NOT NULL UNIQUE,
    authors TEXT NOT NULL DEFAULT '[]',  -- JSON array of display names
    claims TEXT NOT NULL DEFAULT '{}',   -- JSON object {verified: [...], unverified: [...]}
    status TEXT,                         -- JSON object {blacklisted: [...]}
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    processed TEXT
);

CREATE INDEX idx_records_bibcode ON records(bibcode);
CREATE INDEX idx_records_updated ON records(updated);

-- Audit trail of profile fact changes
CREATE TABLE change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,       -- {orcidid}:update:{field}
    oldvalue TEXT NOT NULL,
    newvalue TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE INDEX idx_change_log_key ON change_log(key);

-- Small key/value checkpoints
CREATE TABLE storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
