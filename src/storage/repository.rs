use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};

use crate::storage::models::author_profile::{AuthorProfile, Facts, ProfileStatus};
use crate::storage::models::change_log::ChangeLogEntry;
use crate::storage::models::claim_log::{ClaimLogEntry, ClaimStatus};
use crate::storage::models::key_value::KeyValue;
use crate::storage::models::record::{Record, RecordClaims, RecordStatus};

/// Serializes a timestamp the way every table stores it. A fixed
/// precision keeps lexicographic TEXT comparisons chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp back.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Drops sub-microsecond precision, matching what a timestamp keeps
/// after a storage round-trip. Comparisons between fresh and stored
/// timestamps must happen at this precision.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Timelike;
    ts.with_nanosecond(ts.nanosecond() / 1_000 * 1_000)
        .unwrap_or(ts)
}

fn column_timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn column_json<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Repository providing CRUD operations for all storage models
pub struct Repository {
    connection: Connection,
}

impl Repository {
    /// Creates a new repository with the given database connection
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Returns a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Consumes the repository and returns the connection
    pub fn into_connection(self) -> Connection {
        self.connection
    }

    // === Author Profile Operations ===

    /// Retrieves a profile by ORCID iD
    pub fn get_profile(&self, orcidid: &str) -> Result<Option<AuthorProfile>> {
        self.connection
            .prepare(
                "SELECT id, orcidid, name, facts, status, account_id, created, updated \
                 FROM authors WHERE orcidid = ?1",
            )?
            .query_row([orcidid], Self::row_to_profile)
            .optional()
    }

    /// Inserts a new profile and returns it with its row id set
    pub fn insert_profile(&self, mut profile: AuthorProfile) -> Result<AuthorProfile> {
        self.connection.execute(
            r#"
            INSERT INTO authors (orcidid, name, facts, status, account_id, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                profile.orcidid,
                profile.name,
                serde_json::to_string(&profile.facts).unwrap_or_else(|_| "{}".to_string()),
                profile.status.map(|s| s.as_str()),
                profile.account_id,
                format_timestamp(&profile.created),
                format_timestamp(&profile.updated),
            ],
        )?;
        profile.id = Some(self.connection.last_insert_rowid());
        Ok(profile)
    }

    /// Updates an existing profile in place
    pub fn update_profile(&self, profile: &AuthorProfile) -> Result<()> {
        self.connection.execute(
            r#"
            UPDATE authors SET
                name = ?2, facts = ?3, status = ?4, account_id = ?5, updated = ?6
            WHERE orcidid = ?1
            "#,
            params![
                profile.orcidid,
                profile.name,
                serde_json::to_string(&profile.facts).unwrap_or_else(|_| "{}".to_string()),
                profile.status.map(|s| s.as_str()),
                profile.account_id,
                format_timestamp(&profile.updated),
            ],
        )?;
        Ok(())
    }

    /// All known ORCID iDs, for replay operations
    pub fn list_orcidids(&self) -> Result<Vec<String>> {
        self.connection
            .prepare("SELECT DISTINCT orcidid FROM authors ORDER BY orcidid")?
            .query_map([], |row| row.get(0))?
            .collect()
    }

    fn row_to_profile(row: &Row) -> Result<AuthorProfile> {
        let status: Option<String> = row.get(4)?;
        Ok(AuthorProfile {
            id: Some(row.get(0)?),
            orcidid: row.get(1)?,
            name: row.get(2)?,
            facts: column_json::<Facts>(row, 3)?,
            status: status.as_deref().and_then(ProfileStatus::parse),
            account_id: row.get(5)?,
            created: column_timestamp(row, 6)?,
            updated: column_timestamp(row, 7)?,
        })
    }

    // === Claims Log Operations ===

    /// Finds an identical claim row, used to deduplicate re-imports
    pub fn find_claim(
        &self,
        bibcode: &str,
        orcidid: &str,
        created: &DateTime<Utc>,
    ) -> Result<Option<ClaimLogEntry>> {
        self.connection
            .prepare(
                "SELECT id, orcidid, bibcode, status, provenance, created \
                 FROM claims WHERE bibcode = ?1 AND orcidid = ?2 AND created = ?3",
            )?
            .query_row(
                params![bibcode, orcidid, format_timestamp(created)],
                Self::row_to_claim,
            )
            .optional()
    }

    /// Inserts a batch of claim rows atomically and returns the
    /// persisted snapshots with their row ids set
    pub fn insert_claims(&mut self, entries: Vec<ClaimLogEntry>) -> Result<Vec<ClaimLogEntry>> {
        let tx = self.connection.transaction()?;
        let mut persisted = Vec::with_capacity(entries.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO claims (orcidid, bibcode, status, provenance, created)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for mut entry in entries {
                stmt.execute(params![
                    entry.orcidid,
                    entry.bibcode,
                    entry.status.as_str(),
                    entry.provenance,
                    format_timestamp(&entry.created),
                ])?;
                entry.id = Some(tx.last_insert_rowid());
                persisted.push(entry);
            }
        }
        tx.commit()?;
        Ok(persisted)
    }

    /// The most recent `#full-import` sentinel for an ORCID iD
    pub fn latest_full_import(&self, orcidid: &str) -> Result<Option<ClaimLogEntry>> {
        self.connection
            .prepare(
                "SELECT id, orcidid, bibcode, status, provenance, created \
                 FROM claims WHERE orcidid = ?1 AND status = '#full-import' \
                 ORDER BY created DESC, id DESC LIMIT 1",
            )?
            .query_row([orcidid], Self::row_to_claim)
            .optional()
    }

    /// Claim rows created at or after `since`, oldest first
    pub fn claims_since(
        &self,
        orcidid: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ClaimLogEntry>> {
        self.connection
            .prepare(
                "SELECT id, orcidid, bibcode, status, provenance, created \
                 FROM claims WHERE orcidid = ?1 AND created >= ?2 \
                 ORDER BY created ASC, id ASC",
            )?
            .query_map(params![orcidid, format_timestamp(since)], Self::row_to_claim)?
            .collect()
    }

    /// Claim rows created strictly after `since`, oldest first
    pub fn claims_after(
        &self,
        orcidid: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ClaimLogEntry>> {
        self.connection
            .prepare(
                "SELECT id, orcidid, bibcode, status, provenance, created \
                 FROM claims WHERE orcidid = ?1 AND created > ?2 \
                 ORDER BY created ASC, id ASC",
            )?
            .query_map(params![orcidid, format_timestamp(since)], Self::row_to_claim)?
            .collect()
    }

    fn row_to_claim(row: &Row) -> Result<ClaimLogEntry> {
        let status: String = row.get(3)?;
        Ok(ClaimLogEntry {
            id: Some(row.get(0)?),
            orcidid: row.get(1)?,
            bibcode: row.get(2)?,
            status: ClaimStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown claim status: {}", status).into(),
                )
            })?,
            provenance: row.get(4)?,
            created: column_timestamp(row, 5)?,
        })
    }

    // === Record Operations ===

    /// Retrieves a record by bibcode
    pub fn get_record(&self, bibcode: &str) -> Result<Option<Record>> {
        self.connection
            .prepare(
                "SELECT id, bibcode, authors, claims, status, created, updated, processed \
                 FROM records WHERE bibcode = ?1",
            )?
            .query_row([bibcode], Self::row_to_record)
            .optional()
    }

    /// Inserts a new record and returns it with its row id set
    pub fn insert_record(&self, mut record: Record) -> Result<Record> {
        self.connection.execute(
            r#"
            INSERT INTO records (bibcode, authors, claims, status, created, updated, processed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.bibcode,
                serde_json::to_string(&record.authors).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&record.claims).unwrap_or_else(|_| "{}".to_string()),
                record
                    .status
                    .as_ref()
                    .map(|s| serde_json::to_string(s).unwrap_or_else(|_| "{}".to_string())),
                format_timestamp(&record.created),
                format_timestamp(&record.updated),
                record.processed.as_ref().map(format_timestamp),
            ],
        )?;
        record.id = Some(self.connection.last_insert_rowid());
        Ok(record)
    }

    /// Persists new claim arrays (and optionally a new author list)
    /// for an existing record, bumping `updated` and preserving `created`
    pub fn update_record_claims(
        &self,
        bibcode: &str,
        claims: &RecordClaims,
        authors: Option<&[String]>,
    ) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        match authors {
            Some(authors) => {
                self.connection.execute(
                    "UPDATE records SET claims = ?2, authors = ?3, updated = ?4 WHERE bibcode = ?1",
                    params![
                        bibcode,
                        serde_json::to_string(claims).unwrap_or_else(|_| "{}".to_string()),
                        serde_json::to_string(authors).unwrap_or_else(|_| "[]".to_string()),
                        now,
                    ],
                )?;
            }
            None => {
                self.connection.execute(
                    "UPDATE records SET claims = ?2, updated = ?3 WHERE bibcode = ?1",
                    params![
                        bibcode,
                        serde_json::to_string(claims).unwrap_or_else(|_| "{}".to_string()),
                        now,
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Stamps a record as pushed downstream
    pub fn mark_processed(&self, bibcode: &str) -> Result<()> {
        self.connection.execute(
            "UPDATE records SET processed = ?2 WHERE bibcode = ?1",
            params![bibcode, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    /// Records updated at or after `since`, oldest first (for repush)
    pub fn records_updated_since(&self, since: &DateTime<Utc>) -> Result<Vec<Record>> {
        self.connection
            .prepare(
                "SELECT id, bibcode, authors, claims, status, created, updated, processed \
                 FROM records WHERE updated >= ?1 ORDER BY updated ASC",
            )?
            .query_map([format_timestamp(since)], Self::row_to_record)?
            .collect()
    }

    fn row_to_record(row: &Row) -> Result<Record> {
        let status: Option<String> = row.get(4)?;
        let status = match status {
            Some(raw) => Some(serde_json::from_str::<RecordStatus>(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?),
            None => None,
        };
        let processed: Option<String> = row.get(7)?;
        let processed = match processed {
            Some(raw) => Some(parse_timestamp(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?),
            None => None,
        };
        Ok(Record {
            id: Some(row.get(0)?),
            bibcode: row.get(1)?,
            authors: column_json(row, 2)?,
            claims: column_json(row, 3)?,
            status,
            created: column_timestamp(row, 5)?,
            updated: column_timestamp(row, 6)?,
            processed,
        })
    }

    // === Change Log Operations ===

    /// Appends audit rows for changed profile facts
    pub fn insert_change_log(&mut self, entries: &[ChangeLogEntry]) -> Result<()> {
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO change_log (key, oldvalue, newvalue, created) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.key,
                    entry.oldvalue,
                    entry.newvalue,
                    format_timestamp(&entry.created),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Audit rows stored under one key, oldest first
    pub fn change_log_for_key(&self, key: &str) -> Result<Vec<ChangeLogEntry>> {
        self.connection
            .prepare(
                "SELECT id, key, oldvalue, newvalue, created FROM change_log \
                 WHERE key = ?1 ORDER BY created ASC, id ASC",
            )?
            .query_map([key], |row| {
                Ok(ChangeLogEntry {
                    id: Some(row.get(0)?),
                    key: row.get(1)?,
                    oldvalue: row.get(2)?,
                    newvalue: row.get(3)?,
                    created: column_timestamp(row, 4)?,
                })
            })?
            .collect()
    }

    // === Key/Value Operations ===

    /// Reads a checkpoint value
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.connection
            .prepare("SELECT value FROM storage WHERE key = ?1")?
            .query_row([key], |row| row.get(0))
            .optional()
    }

    /// Writes (or overwrites) a checkpoint value
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.connection.execute(
            "INSERT INTO storage (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Every stored checkpoint, ordered by key
    pub fn all_values(&self) -> Result<Vec<KeyValue>> {
        self.connection
            .prepare("SELECT key, value FROM storage ORDER BY key")?
            .query_map([], |row| {
                Ok(KeyValue {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::{DatabaseConfig, DatabaseManager};
    use chrono::Duration;

    fn test_repository() -> Repository {
        let manager = DatabaseManager::new(DatabaseConfig::in_memory()).unwrap();
        Repository::new(manager.connect().unwrap())
    }

    #[test]
    fn test_profile_round_trip() {
        let repo = test_repository();

        let mut profile = AuthorProfile::new("0000-0003-2686-9241");
        profile.name = "Stern, D K".to_string();
        profile.facts.insert("author", serde_json::json!(["Stern, D K"]));

        let inserted = repo.insert_profile(profile).unwrap();
        assert!(inserted.id.is_some());

        let loaded = repo.get_profile("0000-0003-2686-9241").unwrap().unwrap();
        assert_eq!(loaded.name, "Stern, D K");
        assert_eq!(loaded.status, None);
        assert_eq!(
            loaded.facts.variant_list(crate::matcher::FactField::Author),
            vec!["Stern, D K"]
        );

        assert!(repo.get_profile("0000-0000-0000-0000").unwrap().is_none());
    }

    #[test]
    fn test_insert_claims_atomic_batch() {
        let mut repo = test_repository();
        let now = Utc::now();

        let persisted = repo
            .insert_claims(vec![
                ClaimLogEntry::new(
                    "b123456789123456789",
                    "0000-0000-0000-0001",
                    ClaimStatus::Claimed,
                    "ads test",
                    now,
                ),
                ClaimLogEntry::new(
                    "b123456789123456789",
                    "0000-0000-0000-0001",
                    ClaimStatus::Updated,
                    "",
                    now,
                ),
                ClaimLogEntry::new(
                    "b123456789123456789",
                    "0000-0000-0000-0001",
                    ClaimStatus::Removed,
                    "",
                    now,
                ),
            ])
            .unwrap();

        assert_eq!(persisted.len(), 3);
        assert!(persisted.iter().all(|c| c.id.is_some()));

        let rows = repo
            .claims_since("0000-0000-0000-0001", &(now - Duration::seconds(1)))
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_latest_full_import_wins() {
        let mut repo = test_repository();
        let old = Utc::now() - Duration::days(2);
        let new = Utc::now();

        repo.insert_claims(vec![
            ClaimLogEntry::new("", "0000-0000-0000-0001", ClaimStatus::FullImport, "OrcidImporter", old),
            ClaimLogEntry::new("", "0000-0000-0000-0001", ClaimStatus::FullImport, "OrcidImporter", new),
        ])
        .unwrap();

        let sentinel = repo.latest_full_import("0000-0000-0000-0001").unwrap().unwrap();
        assert_eq!(
            format_timestamp(&sentinel.created),
            format_timestamp(&new)
        );
        assert!(repo.latest_full_import("0000-0000-0000-0002").unwrap().is_none());
    }

    #[test]
    fn test_record_claims_update_preserves_created() {
        let repo = test_repository();

        let record = Record::new("bibcode", vec!["Stern, D K".to_string()]);
        let created = record.created;
        repo.insert_record(record).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));

        let claims = RecordClaims {
            verified: vec!["0000-0000-0000-0001".to_string()],
            unverified: vec!["-".to_string()],
        };
        repo.update_record_claims("bibcode", &claims, None).unwrap();

        let loaded = repo.get_record("bibcode").unwrap().unwrap();
        assert_eq!(loaded.claims, claims);
        assert_eq!(format_timestamp(&loaded.created), format_timestamp(&created));
        assert!(loaded.updated > loaded.created);
        assert!(loaded.processed.is_none());

        repo.mark_processed("bibcode").unwrap();
        let loaded = repo.get_record("bibcode").unwrap().unwrap();
        assert!(loaded.processed.is_some());
    }

    #[test]
    fn test_key_value_upsert() {
        let repo = test_repository();

        assert!(repo.get_value("last.check").unwrap().is_none());
        repo.set_value("last.check", "2017-01-01T00:00:00Z").unwrap();
        repo.set_value("last.check", "2018-01-01T00:00:00Z").unwrap();
        assert_eq!(
            repo.get_value("last.check").unwrap().unwrap(),
            "2018-01-01T00:00:00Z"
        );
        assert_eq!(repo.all_values().unwrap().len(), 1);
    }

    #[test]
    fn test_change_log_round_trip() {
        let mut repo = test_repository();
        let entry = ChangeLogEntry::profile_update(
            "0000-0003-2686-9241",
            "name",
            &serde_json::json!("Stern, D K"),
            &serde_json::json!("Sternx, D K"),
        );
        repo.insert_change_log(&[entry]).unwrap();

        let rows = repo
            .change_log_for_key("0000-0003-2686-9241:update:name")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].oldvalue, "\"Stern, D K\"");
        assert_eq!(rows[0].newvalue, "\"Sternx, D K\"");
    }
}
