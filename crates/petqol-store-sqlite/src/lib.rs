use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use petqol_core::{
    format_calendar_date, format_time_of_day, parse_calendar_date, parse_time_of_day,
    standard_registry, AssessmentCadence, CustomTracking, DomainError, Measurement, MeasurementId,
    MigrationObserver, MigrationPlan, MigrationRegistry, MigrationReport, MigrationStore,
    NotificationPreference, Pet, PetId, PetSeed, QualityScores, Species, LATEST_SCHEMA_VERSION,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::debug;

mod observer;

pub use observer::TracingObserver;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

// Single-pet layout: flat settings plus unowned measurements.
const BASE_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS measurements (
  measurement_id TEXT PRIMARY KEY,
  date TEXT NOT NULL,
  pain REAL NOT NULL CHECK (pain >= 0 AND pain <= 10),
  hunger REAL NOT NULL CHECK (hunger >= 0 AND hunger <= 10),
  hydration REAL NOT NULL CHECK (hydration >= 0 AND hydration <= 10),
  hygiene REAL NOT NULL CHECK (hygiene >= 0 AND hygiene <= 10),
  happiness REAL NOT NULL CHECK (happiness >= 0 AND happiness <= 10),
  mobility REAL NOT NULL CHECK (mobility >= 0 AND mobility <= 10),
  custom_value REAL CHECK (custom_value IS NULL OR (custom_value >= 0 AND custom_value <= 10)),
  notes TEXT NOT NULL DEFAULT '',
  images_json TEXT NOT NULL DEFAULT '[]',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_measurements_date ON measurements(date);
";

const MIGRATION_001_PETS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS pets (
  pet_id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  species TEXT NOT NULL CHECK (species IN ('dog', 'cat', 'other')),
  notifications_enabled INTEGER NOT NULL DEFAULT 0 CHECK (notifications_enabled IN (0, 1)),
  notification_time TEXT,
  custom_tracking_label TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

const MIGRATION_001_OWNER_COLUMN_SQL: &str =
    "ALTER TABLE measurements ADD COLUMN pet_id TEXT REFERENCES pets(pet_id);";

const MIGRATION_001_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_measurements_pet_date ON measurements(pet_id, date);";

const MIGRATION_007_SQL: &str = r"
ALTER TABLE pets ADD COLUMN assessment_cadence TEXT
  CHECK (assessment_cadence IN ('DAILY', 'WEEKLY', 'MONTHLY'));
";

const SELECT_PET_SQL: &str = "SELECT pet_id, name, species, notifications_enabled, \
     notification_time, assessment_cadence, custom_tracking_label, created_at, updated_at \
     FROM pets";

const SELECT_MEASUREMENT_SQL: &str = "SELECT measurement_id, pet_id, date, pain, hunger, \
     hydration, hygiene, happiness, mobility, custom_value, notes, images_json, created_at, \
     updated_at FROM measurements";

const PETS_FILE: &str = "pets.ndjson";
const MEASUREMENTS_FILE: &str = "measurements.ndjson";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: u32,
    pub target_version: u32,
    pub pending_versions: Vec<u32>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_pets: usize,
    pub skipped_existing_pets: usize,
    pub imported_measurements: usize,
    pub skipped_existing_measurements: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub orphaned_measurements: usize,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed pet store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Open the store and bring it to the latest schema before handing it out.
    ///
    /// # Errors
    /// Returns an error when opening fails or any migration step fails.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations. Read-only; a
    /// store without version metadata reports what detection infers from its tables.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = registry()
            .steps()
            .iter()
            .map(|step| step.version)
            .filter(|version| *version > current_version)
            .collect();

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Resolve the migration pass `migrate` would run, without touching any data.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or the store is newer than
    /// this build.
    pub fn plan_migration(&self) -> Result<MigrationPlan> {
        let status = self.schema_status()?;
        registry()
            .plan(status.current_version)
            .with_context(|| format!("failed to plan migration from {}", status.current_version))
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<MigrationReport> {
        self.migrate_with_observer(&mut TracingObserver)
    }

    /// Run the migration pass in one immediate transaction. Step effects and the new
    /// version commit together; any failure leaves the store at its previous version.
    ///
    /// # Errors
    /// Returns an error wrapping [`petqol_core::MigrationError`] when the pass is rejected
    /// or a step fails, or a plain error when the transaction cannot be opened or committed.
    pub fn migrate_with_observer(
        &mut self,
        observer: &mut dyn MigrationObserver,
    ) -> Result<MigrationReport> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin migration transaction")?;
        let (from_version, inferred_from_legacy) = detect_effective_schema_version(&tx)?;
        debug!(from_version, inferred_from_legacy, "migration transaction opened");

        tx.execute_batch(BASE_SCHEMA_SQL).context("failed to apply base schema")?;

        let report = {
            let mut view = MigrationView { conn: &tx };
            registry()
                .run(&mut view, from_version, observer)
                .with_context(|| format!("failed to migrate schema from version {from_version}"))?
        };

        if inferred_from_legacy && from_version > 0 {
            record_schema_version(&tx, from_version)?;
        }
        for version in &report.applied_versions {
            record_schema_version(&tx, *version)?;
        }

        tx.commit().context("failed to commit migration transaction")?;
        debug!(to_version = report.to_version, "migration transaction committed");
        Ok(report)
    }

    /// Persist a new pet profile.
    ///
    /// # Errors
    /// Returns an error when validation fails, the id already exists, or the write fails.
    pub fn insert_pet(&mut self, pet: &Pet) -> Result<()> {
        insert_pet_row(&self.conn, pet)
    }

    /// Replace a pet's mutable fields. `created_at` is kept from the stored row and
    /// `updated_at` is stamped now.
    ///
    /// # Errors
    /// Returns an error when the pet does not exist, validation fails, or the write fails.
    pub fn update_pet(&mut self, pet: &Pet) -> Result<Pet> {
        let Some(existing) = self.get_pet(pet.pet_id)? else {
            return Err(anyhow!("pet not found: {}", pet.pet_id));
        };

        let mut updated = pet.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = OffsetDateTime::now_utc().max(existing.updated_at);
        updated.validate().with_context(|| format!("invalid pet {}", pet.pet_id))?;
        let notification_time =
            updated.notifications.time_of_day.map(format_time_of_day).transpose()?;

        self.conn
            .execute(
                "UPDATE pets SET
                    name = ?2, species = ?3, notifications_enabled = ?4, notification_time = ?5,
                    assessment_cadence = ?6, custom_tracking_label = ?7, updated_at = ?8
                 WHERE pet_id = ?1",
                params![
                    updated.pet_id.to_string(),
                    updated.name,
                    updated.species.as_str(),
                    updated.notifications.enabled,
                    notification_time,
                    updated.assessment_cadence.as_str(),
                    updated.custom_tracking.as_ref().map(|custom| custom.label.as_str()),
                    rfc3339(updated.updated_at)?,
                ],
            )
            .with_context(|| format!("failed to update pet {}", pet.pet_id))?;

        Ok(updated)
    }

    /// # Errors
    /// Returns an error when the query fails or the stored row cannot be decoded.
    pub fn get_pet(&self, pet_id: PetId) -> Result<Option<Pet>> {
        self.conn
            .query_row(
                &format!("{SELECT_PET_SQL} WHERE pet_id = ?1"),
                params![pet_id.to_string()],
                PetRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load pet {pet_id}"))?
            .map(PetRow::into_pet)
            .transpose()
    }

    /// List pets ordered by creation time, then id.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored row cannot be decoded.
    pub fn list_pets(&self) -> Result<Vec<Pet>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_PET_SQL} ORDER BY created_at, pet_id"))
            .context("failed to prepare pet listing")?;
        let rows = stmt.query_map([], PetRow::from_row).context("failed to query pets")?;

        let mut pets = Vec::new();
        for row in rows {
            pets.push(row.context("failed to read pet row")?.into_pet()?);
        }
        Ok(pets)
    }

    /// Append one assessment for an existing pet.
    ///
    /// # Errors
    /// Returns an error when validation fails, the owner pet is unknown, or the write fails.
    pub fn append_measurement(&mut self, measurement: &Measurement) -> Result<()> {
        append_measurement_row(&self.conn, measurement)
    }

    /// # Errors
    /// Returns an error when the query fails or the stored row cannot be decoded.
    pub fn get_measurement(&self, measurement_id: MeasurementId) -> Result<Option<Measurement>> {
        self.conn
            .query_row(
                &format!("{SELECT_MEASUREMENT_SQL} WHERE measurement_id = ?1"),
                params![measurement_id.to_string()],
                MeasurementRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load measurement {measurement_id}"))?
            .map(MeasurementRow::into_measurement)
            .transpose()
    }

    /// List a pet's assessments within an optional inclusive date range, ordered by day
    /// then creation time.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored row cannot be decoded.
    pub fn list_measurements(
        &self,
        pet_id: PetId,
        from: Option<Date>,
        to: Option<Date>,
    ) -> Result<Vec<Measurement>> {
        let from = from.map(format_calendar_date).transpose()?;
        let to = to.map(format_calendar_date).transpose()?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_MEASUREMENT_SQL}
                 WHERE pet_id = ?1
                   AND (?2 IS NULL OR date >= ?2)
                   AND (?3 IS NULL OR date <= ?3)
                 ORDER BY date, created_at, measurement_id"
            ))
            .context("failed to prepare measurement listing")?;
        let rows = stmt
            .query_map(params![pet_id.to_string(), from, to], MeasurementRow::from_row)
            .with_context(|| format!("failed to query measurements for pet {pet_id}"))?;

        let mut measurements = Vec::new();
        for row in rows {
            measurements.push(row.context("failed to read measurement row")?.into_measurement()?);
        }
        Ok(measurements)
    }

    /// # Errors
    /// Returns an error when the settings table cannot be read.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        read_setting(&self.conn, key).with_context(|| format!("failed to read setting {key}"))
    }

    /// # Errors
    /// Returns an error when the settings table cannot be written.
    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("failed to write setting {key}"))?;
        Ok(())
    }

    /// Read several settings at once, one `(key, value)` pair per key, in key order.
    ///
    /// # Errors
    /// Returns an error when the settings table cannot be read.
    pub fn multi_get_settings(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>> {
        read_settings(&self.conn, keys).context("failed to read settings")
    }

    /// Export pets and measurements into NDJSON files with a digest manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let pets = self.list_pets()?;
        let mut measurements = Vec::new();
        for pet in &pets {
            measurements.extend(self.list_measurements(pet.pet_id, None, None)?);
        }

        let pet_digest = write_ndjson_file(&out_dir.join(PETS_FILE), &pets)?;
        let measurement_digest =
            write_ndjson_file(&out_dir.join(MEASUREMENTS_FILE), &measurements)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: PETS_FILE.to_string(),
                    sha256: pet_digest.0,
                    records: pet_digest.1,
                },
                ExportFileDigest {
                    path: MEASUREMENTS_FILE.to_string(),
                    sha256: measurement_digest.0,
                    records: measurement_digest.1,
                },
            ],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Import an exported snapshot directory into this database. Pets load before the
    /// measurements that reference them, and the whole import commits in one immediate
    /// transaction so a rejected row leaves the store untouched.
    ///
    /// # Errors
    /// Returns an error when migration, manifest checks, duplicate handling, or writes fail.
    pub fn import_snapshot(&mut self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest = read_export_manifest(&in_dir.join("manifest.json"))?;
        validate_import_manifest(in_dir, &manifest)?;
        let pets = read_ndjson_file::<Pet>(&in_dir.join(PETS_FILE))?;
        let measurements = read_ndjson_file::<Measurement>(&in_dir.join(MEASUREMENTS_FILE))?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin import transaction")?;
        let mut summary = ImportSummary::default();

        for pet in pets {
            if pet_exists(&tx, pet.pet_id)? {
                if skip_existing {
                    summary.skipped_existing_pets += 1;
                    continue;
                }

                return Err(anyhow!("pet already exists: {}", pet.pet_id));
            }
            insert_pet_row(&tx, &pet)?;
            summary.imported_pets += 1;
        }

        for measurement in measurements {
            if measurement_exists(&tx, measurement.measurement_id)? {
                if skip_existing {
                    summary.skipped_existing_measurements += 1;
                    continue;
                }

                return Err(anyhow!("measurement already exists: {}", measurement.measurement_id));
            }
            append_measurement_row(&tx, &measurement)?;
            summary.imported_measurements += 1;
        }

        tx.commit().context("failed to commit import transaction")?;
        debug!(
            imported_pets = summary.imported_pets,
            imported_measurements = summary.imported_measurements,
            "snapshot import committed"
        );
        Ok(summary)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a `SQLite` backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<MigrationReport> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()
    }

    /// Run quick-check, foreign-key-check, owner coverage, and schema status checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            orphaned_measurements: count_orphaned_measurements(&self.conn)?,
            schema_status: self.schema_status()?,
        })
    }
}

/// The record view a migration pass works through. Borrows the open transaction; it
/// never commits.
struct MigrationView<'a> {
    conn: &'a Connection,
}

fn registry<'a>() -> MigrationRegistry<MigrationView<'a>> {
    standard_registry()
}

impl MigrationStore for MigrationView<'_> {
    type Error = rusqlite::Error;

    fn apply_schema(&mut self, version: u32) -> Result<(), Self::Error> {
        apply_schema_version(self.conn, version)
    }

    fn legacy_settings(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, Self::Error> {
        read_settings(self.conn, keys)
    }

    fn insert_pet(&mut self, seed: &PetSeed) -> Result<PetId, Self::Error> {
        let pet_id = PetId::new();
        let now = rfc3339(OffsetDateTime::now_utc())
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
        let notification_time = seed
            .notifications
            .time_of_day
            .map(format_time_of_day)
            .transpose()
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;

        self.conn.execute(
            "INSERT INTO pets(
                pet_id, name, species, notifications_enabled, notification_time,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                pet_id.to_string(),
                seed.name,
                seed.species.as_str(),
                seed.notifications.enabled,
                notification_time,
                now,
            ],
        )?;
        Ok(pet_id)
    }

    fn pet_ids(&self) -> Result<Vec<PetId>, Self::Error> {
        let mut stmt = self.conn.prepare("SELECT pet_id FROM pets ORDER BY created_at, pet_id")?;
        let rows = stmt.query_map([], |row| id_column(row, 0, PetId::parse))?;
        let ids = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn pet_cadence(&self, pet_id: PetId) -> Result<Option<AssessmentCadence>, Self::Error> {
        let raw: Option<String> = self.conn.query_row(
            "SELECT assessment_cadence FROM pets WHERE pet_id = ?1",
            params![pet_id.to_string()],
            |row| row.get(0),
        )?;

        raw.map(|value| {
            AssessmentCadence::parse(&value).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    Type::Text,
                    format!("unknown assessment cadence {value}").into(),
                )
            })
        })
        .transpose()
    }

    fn set_pet_cadence(
        &mut self,
        pet_id: PetId,
        cadence: AssessmentCadence,
    ) -> Result<(), Self::Error> {
        self.conn.execute(
            "UPDATE pets SET assessment_cadence = ?2 WHERE pet_id = ?1",
            params![pet_id.to_string(), cadence.as_str()],
        )?;
        Ok(())
    }

    fn measurement_ids(&self) -> Result<Vec<MeasurementId>, Self::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT measurement_id FROM measurements ORDER BY date, created_at, measurement_id")?;
        let rows = stmt.query_map([], |row| id_column(row, 0, MeasurementId::parse))?;
        let ids = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn set_measurement_owner(
        &mut self,
        measurement_id: MeasurementId,
        pet_id: PetId,
    ) -> Result<(), Self::Error> {
        self.conn.execute(
            "UPDATE measurements SET pet_id = ?2 WHERE measurement_id = ?1",
            params![measurement_id.to_string(), pet_id.to_string()],
        )?;
        Ok(())
    }
}

struct PetRow {
    pet_id: String,
    name: String,
    species: String,
    notifications_enabled: bool,
    notification_time: Option<String>,
    assessment_cadence: Option<String>,
    custom_tracking_label: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PetRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pet_id: row.get(0)?,
            name: row.get(1)?,
            species: row.get(2)?,
            notifications_enabled: row.get(3)?,
            notification_time: row.get(4)?,
            assessment_cadence: row.get(5)?,
            custom_tracking_label: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_pet(self) -> Result<Pet> {
        let pet_id = PetId::parse(&self.pet_id)?;
        let species = Species::parse(&self.species)
            .ok_or_else(|| anyhow!("pet {pet_id} has unknown species {}", self.species))?;
        let time_of_day = self.notification_time.as_deref().map(parse_time_of_day).transpose()?;
        let Some(raw_cadence) = self.assessment_cadence else {
            return Err(anyhow!("pet {pet_id} has no assessment cadence; migrate the store first"));
        };
        let assessment_cadence = AssessmentCadence::parse(&raw_cadence)
            .ok_or_else(|| anyhow!("pet {pet_id} has unknown assessment cadence {raw_cadence}"))?;

        Ok(Pet {
            pet_id,
            name: self.name,
            species,
            notifications: NotificationPreference {
                enabled: self.notifications_enabled,
                time_of_day,
            },
            assessment_cadence,
            custom_tracking: self.custom_tracking_label.map(|label| CustomTracking { label }),
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

struct MeasurementRow {
    measurement_id: String,
    pet_id: Option<String>,
    date: String,
    scores: QualityScores,
    custom_value: Option<f64>,
    notes: String,
    images_json: String,
    created_at: String,
    updated_at: String,
}

impl MeasurementRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            measurement_id: row.get(0)?,
            pet_id: row.get(1)?,
            date: row.get(2)?,
            scores: QualityScores {
                pain: row.get(3)?,
                hunger: row.get(4)?,
                hydration: row.get(5)?,
                hygiene: row.get(6)?,
                happiness: row.get(7)?,
                mobility: row.get(8)?,
            },
            custom_value: row.get(9)?,
            notes: row.get(10)?,
            images_json: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_measurement(self) -> Result<Measurement> {
        let measurement_id = MeasurementId::parse(&self.measurement_id)?;
        let Some(raw_pet_id) = self.pet_id else {
            return Err(anyhow!(
                "measurement {measurement_id} has no owner pet; migrate the store first"
            ));
        };
        let images = serde_json::from_str::<Vec<String>>(&self.images_json)
            .with_context(|| format!("invalid images_json for measurement {measurement_id}"))?;

        Ok(Measurement {
            measurement_id,
            pet_id: PetId::parse(&raw_pet_id)?,
            date: parse_calendar_date(&self.date)?,
            scores: self.scores,
            custom_value: self.custom_value,
            notes: self.notes,
            images,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn insert_pet_row(conn: &Connection, pet: &Pet) -> Result<()> {
    pet.validate().with_context(|| format!("invalid pet {}", pet.pet_id))?;
    let notification_time = pet.notifications.time_of_day.map(format_time_of_day).transpose()?;

    conn.execute(
        "INSERT INTO pets(
            pet_id, name, species, notifications_enabled, notification_time,
            assessment_cadence, custom_tracking_label, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            pet.pet_id.to_string(),
            pet.name,
            pet.species.as_str(),
            pet.notifications.enabled,
            notification_time,
            pet.assessment_cadence.as_str(),
            pet.custom_tracking.as_ref().map(|custom| custom.label.as_str()),
            rfc3339(pet.created_at)?,
            rfc3339(pet.updated_at)?,
        ],
    )
    .with_context(|| format!("failed to insert pet {}", pet.pet_id))?;
    Ok(())
}

fn append_measurement_row(conn: &Connection, measurement: &Measurement) -> Result<()> {
    measurement
        .validate()
        .with_context(|| format!("invalid measurement {}", measurement.measurement_id))?;
    if !pet_exists(conn, measurement.pet_id)? {
        return Err(anyhow!("pet not found: {}", measurement.pet_id));
    }

    let images_json =
        serde_json::to_string(&measurement.images).context("failed to serialize images")?;
    let scores = measurement.scores;
    conn.execute(
        "INSERT INTO measurements(
            measurement_id, pet_id, date, pain, hunger, hydration, hygiene, happiness,
            mobility, custom_value, notes, images_json, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            measurement.measurement_id.to_string(),
            measurement.pet_id.to_string(),
            format_calendar_date(measurement.date)?,
            scores.pain,
            scores.hunger,
            scores.hydration,
            scores.hygiene,
            scores.happiness,
            scores.mobility,
            measurement.custom_value,
            measurement.notes,
            images_json,
            rfc3339(measurement.created_at)?,
            rfc3339(measurement.updated_at)?,
        ],
    )
    .with_context(|| {
        format!("failed to insert measurement {}", measurement.measurement_id)
    })?;
    Ok(())
}

fn pet_exists(conn: &Connection, pet_id: PetId) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM pets WHERE pet_id = ?1)",
            params![pet_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check pet existence for {pet_id}"))?;
    Ok(exists == 1)
}

fn measurement_exists(conn: &Connection, measurement_id: MeasurementId) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM measurements WHERE measurement_id = ?1)",
            params![measurement_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check measurement existence for {measurement_id}"))?;
    Ok(exists == 1)
}

fn apply_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    match version {
        1 => {
            conn.execute_batch(MIGRATION_001_PETS_SQL)?;
            if !table_has_column(conn, "measurements", "pet_id")? {
                conn.execute_batch(MIGRATION_001_OWNER_COLUMN_SQL)?;
            }
            conn.execute_batch(MIGRATION_001_INDEX_SQL)
        }
        7 => {
            if !table_has_column(conn, "pets", "assessment_cadence")? {
                conn.execute_batch(MIGRATION_007_SQL)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn read_setting(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
}

fn read_settings(conn: &Connection, keys: &[&str]) -> rusqlite::Result<Vec<(String, Option<String>)>> {
    keys.iter()
        .map(|key| -> rusqlite::Result<(String, Option<String>)> {
            Ok(((*key).to_string(), read_setting(conn, key)?))
        })
        .collect()
}

fn id_column<T>(
    row: &rusqlite::Row<'_>,
    index: usize,
    parse: fn(&str) -> Result<T, DomainError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn table_exists(conn: &Connection, table_name: &str) -> rusqlite::Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table_name],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<u32> {
    if !table_exists(conn, "schema_migrations").context("failed to inspect schema metadata")? {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, u32>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(u32, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "pets").context("failed to inspect legacy schema")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "pets", "assessment_cadence")
        .context("failed to inspect legacy pets table")?
    {
        return Ok((7, true));
    }

    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: u32) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn count_orphaned_measurements(conn: &Connection) -> Result<usize> {
    if !table_exists(conn, "measurements").context("failed to inspect measurements table")? {
        return Ok(0);
    }

    let sql = if table_has_column(conn, "measurements", "pet_id")
        .context("failed to inspect measurements table")?
    {
        "SELECT COUNT(*) FROM measurements m
         WHERE m.pet_id IS NULL
            OR NOT EXISTS(SELECT 1 FROM pets p WHERE p.pet_id = m.pet_id)"
    } else {
        "SELECT COUNT(*) FROM measurements"
    };

    let count = conn
        .query_row(sql, [], |row| row.get::<_, i64>(0))
        .context("failed to count orphaned measurements")?;
    usize::try_from(count).context("orphaned measurement count out of range")
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse NDJSON row {} from {}", index + 1, path.display())
        })?;
        values.push(value);
    }

    Ok(values)
}

fn read_export_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read manifest file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse manifest JSON {}", path.display()))
}

fn ndjson_digest_and_records(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut records = 0_usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        if !line.trim().is_empty() {
            records += 1;
        }
    }

    Ok((format!("{:x}", hasher.finalize()), records))
}

fn validate_import_manifest(in_dir: &Path, manifest: &ExportManifest) -> Result<()> {
    if manifest.schema_version == 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported export schema version {}; supported range is 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    let mut by_path: BTreeMap<&str, &ExportFileDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for required in [PETS_FILE, MEASUREMENTS_FILE] {
        let Some(expected) = by_path.get(required) else {
            return Err(anyhow!("manifest is missing required file entry: {required}"));
        };
        let file_path = in_dir.join(required);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }

        let (actual_sha256, actual_records) = ndjson_digest_and_records(&file_path)?;
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {required}: expected {}, got {}",
                expected.sha256,
                actual_sha256
            ));
        }
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {required}: expected {}, got {}",
                expected.records,
                actual_records
            ));
        }
    }

    Ok(())
}
