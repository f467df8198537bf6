use std::error::Error as StdError;
use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    parse_time_of_day, AssessmentCadence, MeasurementId, NotificationPreference, PetId, Species,
    PET_REQUIRES_MIGRATION,
};

pub const LATEST_SCHEMA_VERSION: u32 = 7;

pub const LEGACY_NAME_KEY: &str = "name";
pub const LEGACY_SPECIES_KEY: &str = "species";
pub const LEGACY_NOTIFICATIONS_ENABLED_KEY: &str = "notificationsEnabled";
pub const LEGACY_NOTIFICATION_TIME_KEY: &str = "notificationTime";

/// Flat single-pet settings read once, while backfilling the multi-pet model.
pub const LEGACY_SETTING_KEYS: [&str; 4] = [
    LEGACY_NAME_KEY,
    LEGACY_SPECIES_KEY,
    LEGACY_NOTIFICATIONS_ENABLED_KEY,
    LEGACY_NOTIFICATION_TIME_KEY,
];

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid migration registry: {0}")]
    InvalidRegistry(String),
    #[error("store schema version {found} is newer than the latest supported version {latest}")]
    SchemaVersionRegression { found: u32, latest: u32 },
    #[error("migration step {version} ({name}) failed: {source}")]
    StepFailed {
        version: u32,
        name: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Record access a migration pass needs from the host store.
///
/// Every call happens inside the host's open transaction; implementations must not commit.
pub trait MigrationStore {
    type Error: StdError + Send + Sync + 'static;

    /// Structural changes (tables, columns, indexes) introduced at `version`. Runs right
    /// before the record step with the same bound.
    ///
    /// # Errors
    /// Returns the store error when the schema change cannot be applied.
    fn apply_schema(&mut self, _version: u32) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Read legacy flat settings, one `(key, value)` pair per requested key, in key order.
    ///
    /// # Errors
    /// Returns the store error when the settings cannot be read.
    fn legacy_settings(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, Self::Error>;

    /// # Errors
    /// Returns the store error when the pet row cannot be written.
    fn insert_pet(&mut self, seed: &PetSeed) -> Result<PetId, Self::Error>;

    /// # Errors
    /// Returns the store error when pets cannot be listed.
    fn pet_ids(&self) -> Result<Vec<PetId>, Self::Error>;

    /// # Errors
    /// Returns the store error when the pet cannot be read.
    fn pet_cadence(&self, pet_id: PetId) -> Result<Option<AssessmentCadence>, Self::Error>;

    /// # Errors
    /// Returns the store error when the pet cannot be updated.
    fn set_pet_cadence(
        &mut self,
        pet_id: PetId,
        cadence: AssessmentCadence,
    ) -> Result<(), Self::Error>;

    /// # Errors
    /// Returns the store error when measurements cannot be listed.
    fn measurement_ids(&self) -> Result<Vec<MeasurementId>, Self::Error>;

    /// # Errors
    /// Returns the store error when the measurement cannot be updated.
    fn set_measurement_owner(
        &mut self,
        measurement_id: MeasurementId,
        pet_id: PetId,
    ) -> Result<(), Self::Error>;
}

/// Diagnostic callbacks fired while a pass runs. Every hook defaults to a no-op.
pub trait MigrationObserver {
    fn pass_started(&mut self, _from_version: u32, _to_version: u32) {}
    fn step_started(&mut self, _version: u32, _name: &'static str) {}
    fn step_finished(&mut self, _version: u32, _name: &'static str) {}
    fn legacy_setting_missing(&mut self, _key: &str) {}
    fn legacy_setting_invalid(&mut self, _key: &str, _value: &str) {}
    fn pet_created(&mut self, _pet_id: PetId, _seed: &PetSeed) {}
    fn measurement_backfilled(&mut self, _measurement_id: MeasurementId, _pet_id: PetId) {}
    fn pet_cadence_defaulted(&mut self, _pet_id: PetId, _cadence: AssessmentCadence) {}
    fn pass_finished(&mut self, _report: &MigrationReport) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {}

/// Fields of the pet synthesized from pre-multi-pet settings. It has no cadence yet.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PetSeed {
    pub name: String,
    pub species: Species,
    pub notifications: NotificationPreference,
}

impl PetSeed {
    /// Build the seed from `multi_get`-style pairs, falling back to conservative defaults.
    #[must_use]
    pub fn from_legacy_settings(
        settings: &[(String, Option<String>)],
        observer: &mut dyn MigrationObserver,
    ) -> Self {
        let name = legacy_value(settings, LEGACY_NAME_KEY, observer)
            .map_or_else(|| PET_REQUIRES_MIGRATION.to_string(), str::to_string);

        let species = match legacy_value(settings, LEGACY_SPECIES_KEY, observer) {
            Some(raw) => {
                let species = Species::from_legacy(raw);
                if species == Species::Other && !raw.trim().eq_ignore_ascii_case("other") {
                    observer.legacy_setting_invalid(LEGACY_SPECIES_KEY, raw);
                }
                species
            }
            None => Species::Other,
        };

        let enabled = match legacy_value(settings, LEGACY_NOTIFICATIONS_ENABLED_KEY, observer)
            .map(str::trim)
        {
            Some(raw) if raw.eq_ignore_ascii_case("true") => true,
            Some(raw) if raw.eq_ignore_ascii_case("false") => false,
            Some(raw) => {
                observer.legacy_setting_invalid(LEGACY_NOTIFICATIONS_ENABLED_KEY, raw);
                false
            }
            None => false,
        };

        let time_of_day = legacy_value(settings, LEGACY_NOTIFICATION_TIME_KEY, observer).and_then(
            |raw| match parse_time_of_day(raw.trim()) {
                Ok(time) => Some(time),
                Err(_) => {
                    observer.legacy_setting_invalid(LEGACY_NOTIFICATION_TIME_KEY, raw);
                    None
                }
            },
        );

        Self { name, species, notifications: NotificationPreference { enabled, time_of_day } }
    }
}

fn legacy_value<'a>(
    settings: &'a [(String, Option<String>)],
    key: &str,
    observer: &mut dyn MigrationObserver,
) -> Option<&'a str> {
    let value = settings
        .iter()
        .find(|(candidate, _)| candidate == key)
        .and_then(|(_, value)| value.as_deref())
        .filter(|value| !value.trim().is_empty());

    if value.is_none() {
        observer.legacy_setting_missing(key);
    }
    value
}

pub type StepFn<S> =
    fn(&mut S, &mut dyn MigrationObserver) -> Result<(), <S as MigrationStore>::Error>;

pub struct MigrationStep<S: MigrationStore> {
    pub version: u32,
    pub name: &'static str,
    pub apply: StepFn<S>,
}

impl<S: MigrationStore> Clone for MigrationStep<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: MigrationStore> Copy for MigrationStep<S> {}

impl<S: MigrationStore> Debug for MigrationStep<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationPlan {
    pub from_version: u32,
    pub to_version: u32,
    pub pending_versions: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied_versions: Vec<u32>,
}

impl MigrationReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied_versions.is_empty()
    }
}

/// Version-gated steps, kept in strictly ascending bound order.
pub struct MigrationRegistry<S: MigrationStore> {
    latest_version: u32,
    steps: Vec<MigrationStep<S>>,
}

impl<S: MigrationStore> Debug for MigrationRegistry<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("latest_version", &self.latest_version)
            .field("steps", &self.steps)
            .finish()
    }
}

impl<S: MigrationStore> MigrationRegistry<S> {
    #[must_use]
    pub fn new(latest_version: u32) -> Self {
        Self { latest_version, steps: Vec::new() }
    }

    #[must_use]
    pub fn latest_version(&self) -> u32 {
        self.latest_version
    }

    #[must_use]
    pub fn steps(&self) -> &[MigrationStep<S>] {
        &self.steps
    }

    /// Append a step. Bounds must keep increasing and stay within the latest version.
    ///
    /// # Errors
    /// Returns [`MigrationError::InvalidRegistry`] when the new step would break ordering.
    pub fn add_step(
        &mut self,
        version: u32,
        name: &'static str,
        apply: StepFn<S>,
    ) -> Result<(), MigrationError> {
        self.steps.push(MigrationStep { version, name, apply });
        if let Err(err) = self.validate() {
            self.steps.pop();
            return Err(err);
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`MigrationError::InvalidRegistry`] when the new step would break ordering.
    pub fn with_step(
        mut self,
        version: u32,
        name: &'static str,
        apply: StepFn<S>,
    ) -> Result<Self, MigrationError> {
        self.add_step(version, name, apply)?;
        Ok(self)
    }

    /// # Errors
    /// Returns [`MigrationError::InvalidRegistry`] for a zero latest version, a zero bound,
    /// bounds out of ascending order, or a bound above the latest version.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.latest_version == 0 {
            return Err(MigrationError::InvalidRegistry(
                "latest schema version MUST be >= 1".to_string(),
            ));
        }

        let mut previous = 0_u32;
        for step in &self.steps {
            if step.version == 0 {
                return Err(MigrationError::InvalidRegistry(format!(
                    "step {} MUST have a version bound >= 1",
                    step.name
                )));
            }
            if step.version <= previous {
                return Err(MigrationError::InvalidRegistry(format!(
                    "step {} at version {} does not follow version {previous}",
                    step.name, step.version
                )));
            }
            if step.version > self.latest_version {
                return Err(MigrationError::InvalidRegistry(format!(
                    "step {} at version {} exceeds latest version {}",
                    step.name, step.version, self.latest_version
                )));
            }
            previous = step.version;
        }

        Ok(())
    }

    /// Resolve which steps a store starting at `from_version` would run.
    ///
    /// # Errors
    /// Returns [`MigrationError::SchemaVersionRegression`] when the store is newer than
    /// this registry, or [`MigrationError::InvalidRegistry`] when validation fails.
    pub fn plan(&self, from_version: u32) -> Result<MigrationPlan, MigrationError> {
        self.validate()?;

        if from_version > self.latest_version {
            return Err(MigrationError::SchemaVersionRegression {
                found: from_version,
                latest: self.latest_version,
            });
        }

        Ok(MigrationPlan {
            from_version,
            to_version: self.latest_version,
            pending_versions: self
                .pending(from_version)
                .map(|step| step.version)
                .collect(),
        })
    }

    /// Apply every step whose bound exceeds `from_version`, in ascending order, stopping at
    /// the first failure. Persisting the resulting version is left to the caller's
    /// transaction.
    ///
    /// # Errors
    /// Returns [`MigrationError::StepFailed`] for the first failing step, or any planning
    /// error from [`MigrationRegistry::plan`].
    pub fn run(
        &self,
        store: &mut S,
        from_version: u32,
        observer: &mut dyn MigrationObserver,
    ) -> Result<MigrationReport, MigrationError> {
        let plan = self.plan(from_version)?;
        observer.pass_started(plan.from_version, plan.to_version);

        let applied_versions =
            self.pending(from_version).try_fold(Vec::new(), |mut applied, step| {
                observer.step_started(step.version, step.name);
                run_step(step, &mut *store, &mut *observer).map_err(|source| {
                    MigrationError::StepFailed {
                        version: step.version,
                        name: step.name,
                        source: Box::new(source),
                    }
                })?;
                observer.step_finished(step.version, step.name);
                applied.push(step.version);
                Ok::<_, MigrationError>(applied)
            })?;

        let report = MigrationReport {
            from_version: plan.from_version,
            to_version: plan.to_version,
            applied_versions,
        };
        observer.pass_finished(&report);
        Ok(report)
    }

    fn pending(&self, from_version: u32) -> impl Iterator<Item = &MigrationStep<S>> + '_ {
        self.steps.iter().filter(move |step| step.version > from_version)
    }
}

fn run_step<S: MigrationStore>(
    step: &MigrationStep<S>,
    store: &mut S,
    observer: &mut dyn MigrationObserver,
) -> Result<(), S::Error> {
    store.apply_schema(step.version)?;
    (step.apply)(store, observer)
}

/// Registry of the pet/measurement schema history.
#[must_use]
pub fn standard_registry<S: MigrationStore>() -> MigrationRegistry<S> {
    MigrationRegistry {
        latest_version: LATEST_SCHEMA_VERSION,
        steps: vec![
            MigrationStep { version: 1, name: "multi_pet_backfill", apply: multi_pet_step::<S> },
            MigrationStep {
                version: 7,
                name: "assessment_cadence_default",
                apply: assessment_cadence_step::<S>,
            },
        ],
    }
}

fn multi_pet_step<S: MigrationStore>(
    store: &mut S,
    observer: &mut dyn MigrationObserver,
) -> Result<(), S::Error> {
    backfill_single_pet(store, observer).map(|_| ())
}

fn assessment_cadence_step<S: MigrationStore>(
    store: &mut S,
    observer: &mut dyn MigrationObserver,
) -> Result<(), S::Error> {
    default_assessment_cadence(store, observer).map(|_| ())
}

/// Create the single pet implied by a pre-multi-pet store and hand it every measurement.
///
/// # Errors
/// Propagates the first store error.
pub fn backfill_single_pet<S: MigrationStore>(
    store: &mut S,
    observer: &mut dyn MigrationObserver,
) -> Result<PetId, S::Error> {
    let settings = store.legacy_settings(&LEGACY_SETTING_KEYS)?;
    let seed = PetSeed::from_legacy_settings(&settings, observer);
    let pet_id = store.insert_pet(&seed)?;
    observer.pet_created(pet_id, &seed);

    for measurement_id in store.measurement_ids()? {
        store.set_measurement_owner(measurement_id, pet_id)?;
        observer.measurement_backfilled(measurement_id, pet_id);
    }

    Ok(pet_id)
}

/// Give every pet without an assessment cadence the default one. Returns how many changed.
///
/// # Errors
/// Propagates the first store error.
pub fn default_assessment_cadence<S: MigrationStore>(
    store: &mut S,
    observer: &mut dyn MigrationObserver,
) -> Result<usize, S::Error> {
    let cadence = AssessmentCadence::default();
    let mut defaulted = 0;
    for pet_id in store.pet_ids()? {
        if store.pet_cadence(pet_id)?.is_none() {
            store.set_pet_cadence(pet_id, cadence)?;
            observer.pet_cadence_defaulted(pet_id, cadence);
            defaulted += 1;
        }
    }
    Ok(defaulted)
}
