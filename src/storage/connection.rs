use rusqlite::{Connection, OpenFlags, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::schema::SchemaMigrator;

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,
    /// Whether to create the database if it doesn't exist
    pub create_if_missing: bool,
    /// Whether to enable WAL mode for better concurrency
    pub enable_wal_mode: bool,
    /// Busy timeout in seconds
    pub busy_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Creates a new database configuration with default values
    pub fn new<P: AsRef<Path>>(database_path: P) -> Self {
        Self {
            database_path: database_path.as_ref().to_path_buf(),
            create_if_missing: true,
            enable_wal_mode: true,
            busy_timeout_seconds: 30,
        }
    }

    /// Creates configuration for an in-memory database (testing)
    pub fn in_memory() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            create_if_missing: true,
            enable_wal_mode: false, // WAL mode not supported for in-memory databases
            busy_timeout_seconds: 10,
        }
    }

    /// Creates configuration for a temporary database (testing)
    pub fn temporary() -> Self {
        let temp_dir = std::env::temp_dir();
        let db_name = format!("orcid_pipeline_test_{}.db", uuid::Uuid::new_v4());
        Self {
            database_path: temp_dir.join(db_name),
            create_if_missing: true,
            enable_wal_mode: true,
            busy_timeout_seconds: 10,
        }
    }

    /// Validates the database configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.is_in_memory() {
            if let Some(parent) = self.database_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() && !self.create_if_missing {
                    return Err(format!(
                        "Database directory does not exist: {}",
                        parent.display()
                    ));
                }
            }
        }

        if self.busy_timeout_seconds == 0 {
            return Err("Busy timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Returns true if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(":memory:")
    }
}

/// Database connection manager that handles connection setup and migrations
pub struct DatabaseManager {
    config: DatabaseConfig,
}

impl DatabaseManager {
    /// Creates a new database manager with the given configuration
    pub fn new(config: DatabaseConfig) -> std::result::Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Opens a connection to the database and applies all migrations
    pub fn connect(&self) -> Result<Connection> {
        let mut connection = self.connect_raw()?;
        self.apply_migrations(&mut connection)?;
        Ok(connection)
    }

    /// Opens a connection without applying migrations (for migration testing)
    pub fn connect_raw(&self) -> Result<Connection> {
        self.ensure_database_directory()?;
        let connection = self.open_connection()?;
        self.configure_connection(&connection)?;
        Ok(connection)
    }

    /// Ensures the database directory exists
    fn ensure_database_directory(&self) -> Result<()> {
        if self.config.is_in_memory() {
            return Ok(());
        }

        if let Some(parent) = self.config.database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() && self.config.create_if_missing {
                fs::create_dir_all(parent).map_err(|e| {
                    rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("Failed to create database directory: {}", e)),
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Opens the SQLite connection with appropriate flags
    fn open_connection(&self) -> Result<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;

        if self.config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        if self.config.is_in_memory() {
            return Connection::open_in_memory();
        }

        Connection::open_with_flags(&self.config.database_path, flags)
    }

    /// Configures the connection with performance and safety settings
    fn configure_connection(&self, connection: &Connection) -> Result<()> {
        connection.pragma_update(None, "foreign_keys", "ON")?;

        if self.config.enable_wal_mode && !self.config.is_in_memory() {
            connection.pragma_update(None, "journal_mode", "WAL")?;
            connection.pragma_update(None, "synchronous", "NORMAL")?;
        }

        connection.pragma_update(None, "temp_store", "MEMORY")?;
        connection.busy_timeout(std::time::Duration::from_secs(
            self.config.busy_timeout_seconds,
        ))?;

        Ok(())
    }

    /// Applies all database migrations
    fn apply_migrations(&self, connection: &mut Connection) -> Result<()> {
        let migrated_conn = std::mem::replace(connection, Connection::open_in_memory()?);
        let mut migrator = SchemaMigrator::new(migrated_conn);
        migrator.migrate()?;
        *connection = migrator.into_connection();
        Ok(())
    }

    /// Returns the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Checks if the database exists on disk
    pub fn database_exists(&self) -> bool {
        self.config.is_in_memory() || self.config.database_path.exists()
    }
}
