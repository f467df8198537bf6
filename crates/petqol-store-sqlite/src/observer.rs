use petqol_core::{AssessmentCadence, MeasurementId, MigrationObserver, MigrationReport, PetId, PetSeed};
use tracing::{debug, info, warn};

/// Forwards migration diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn pass_started(&mut self, from_version: u32, to_version: u32) {
        info!(from_version, to_version, "schema migration started");
    }

    fn step_started(&mut self, version: u32, name: &'static str) {
        info!(version, step = name, "applying migration step");
    }

    fn step_finished(&mut self, version: u32, name: &'static str) {
        info!(version, step = name, "migration step applied");
    }

    fn legacy_setting_missing(&mut self, key: &str) {
        debug!(key, "legacy setting absent, using default");
    }

    fn legacy_setting_invalid(&mut self, key: &str, value: &str) {
        warn!(key, value, "legacy setting unreadable, using default");
    }

    fn pet_created(&mut self, pet_id: PetId, seed: &PetSeed) {
        info!(
            pet_id = %pet_id,
            name = %seed.name,
            species = seed.species.as_str(),
            notifications_enabled = seed.notifications.enabled,
            "created pet from legacy settings"
        );
    }

    fn measurement_backfilled(&mut self, measurement_id: MeasurementId, pet_id: PetId) {
        debug!(measurement_id = %measurement_id, pet_id = %pet_id, "measurement owner backfilled");
    }

    fn pet_cadence_defaulted(&mut self, pet_id: PetId, cadence: AssessmentCadence) {
        debug!(pet_id = %pet_id, cadence = cadence.as_str(), "assessment cadence defaulted");
    }

    fn pass_finished(&mut self, report: &MigrationReport) {
        info!(
            from_version = report.from_version,
            to_version = report.to_version,
            applied = ?report.applied_versions,
            "schema migration finished"
        );
    }
}
