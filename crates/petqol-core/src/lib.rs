use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};
use ulid::Ulid;

mod migration;
mod summary;

pub use migration::{
    backfill_single_pet, default_assessment_cadence, standard_registry, MigrationError,
    MigrationObserver, MigrationPlan, MigrationRegistry, MigrationReport, MigrationStep,
    MigrationStore, NoopObserver, PetSeed, StepFn, LATEST_SCHEMA_VERSION,
    LEGACY_NAME_KEY, LEGACY_NOTIFICATIONS_ENABLED_KEY, LEGACY_NOTIFICATION_TIME_KEY,
    LEGACY_SETTING_KEYS, LEGACY_SPECIES_KEY,
};
pub use summary::{summarize, MetricAverages, QualitySummary, Trend, GOOD_DAY_THRESHOLD};

/// Placeholder pet name written when no legacy name survives a migration.
pub const PET_REQUIRES_MIGRATION: &str = "PET_REQUIRES_MIGRATION";

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;
pub const SCORE_STEP: f64 = 2.5;

time::serde::format_description!(calendar_date, Date, "[year]-[month]-[day]");
time::serde::format_description!(clock_time, Time, "[hour]:[minute]");

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PetId(pub Ulid);

impl PetId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a pet identifier from its canonical ULID text.
    ///
    /// # Errors
    /// Returns [`DomainError::Parse`] when `raw` is not a valid ULID.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| DomainError::Parse(format!("invalid pet id {raw}: {err}")))
    }
}

impl Default for PetId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MeasurementId(pub Ulid);

impl MeasurementId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a measurement identifier from its canonical ULID text.
    ///
    /// # Errors
    /// Returns [`DomainError::Parse`] when `raw` is not a valid ULID.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| DomainError::Parse(format!("invalid measurement id {raw}: {err}")))
    }
}

impl Default for MeasurementId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MeasurementId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Dog,
    Cat,
    Other,
}

impl Species {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dog => "dog",
            Self::Cat => "cat",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dog" => Some(Self::Dog),
            "cat" => Some(Self::Cat),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Lenient mapping used for flat legacy settings: case-insensitive, unknown values become `Other`.
    #[must_use]
    pub fn from_legacy(value: &str) -> Self {
        Self::parse(&value.trim().to_ascii_lowercase()).unwrap_or(Self::Other)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentCadence {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl AssessmentCadence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DAILY" => Some(Self::Daily),
            "WEEKLY" => Some(Self::Weekly),
            "MONTHLY" => Some(Self::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct NotificationPreference {
    pub enabled: bool,
    #[serde(default, with = "clock_time::option")]
    pub time_of_day: Option<Time>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CustomTracking {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Pet {
    pub pet_id: PetId,
    pub name: String,
    pub species: Species,
    pub notifications: NotificationPreference,
    pub assessment_cadence: AssessmentCadence,
    #[serde(default)]
    pub custom_tracking: Option<CustomTracking>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Pet {
    /// Build a new pet profile stamped with one creation time.
    #[must_use]
    pub fn new(name: impl Into<String>, species: Species, now: OffsetDateTime) -> Self {
        Self {
            pet_id: PetId::new(),
            name: name.into(),
            species,
            notifications: NotificationPreference::default(),
            assessment_cadence: AssessmentCadence::default(),
            custom_tracking: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate a pet profile before it is persisted.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when the name or custom-tracking label is blank,
    /// or when `updated_at` precedes `created_at`.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("pet name MUST be non-empty".to_string()));
        }

        if let Some(custom) = &self.custom_tracking {
            if custom.label.trim().is_empty() {
                return Err(DomainError::Validation(
                    "custom tracking label MUST be non-empty when configured".to_string(),
                ));
            }
        }

        if self.updated_at < self.created_at {
            return Err(DomainError::Validation(
                "pet updated_at MUST NOT precede created_at".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn requires_follow_up(&self) -> bool {
        self.name == PET_REQUIRES_MIGRATION
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Pain,
    Hunger,
    Hydration,
    Hygiene,
    Happiness,
    Mobility,
}

impl Metric {
    pub const ALL: [Self; 6] =
        [Self::Pain, Self::Hunger, Self::Hydration, Self::Hygiene, Self::Happiness, Self::Mobility];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pain => "pain",
            Self::Hunger => "hunger",
            Self::Hydration => "hydration",
            Self::Hygiene => "hygiene",
            Self::Happiness => "happiness",
            Self::Mobility => "mobility",
        }
    }
}

/// The six required daily sub-scores. Higher is better on every axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualityScores {
    pub pain: f64,
    pub hunger: f64,
    pub hydration: f64,
    pub hygiene: f64,
    pub happiness: f64,
    pub mobility: f64,
}

impl QualityScores {
    #[must_use]
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Pain => self.pain,
            Metric::Hunger => self.hunger,
            Metric::Hydration => self.hydration,
            Metric::Hygiene => self.hygiene,
            Metric::Happiness => self.happiness,
            Metric::Mobility => self.mobility,
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        Metric::ALL.iter().map(|metric| self.get(*metric)).sum()
    }

    /// # Errors
    /// Returns [`DomainError::Validation`] naming the first sub-score off the 0–10 / 2.5 grid.
    pub fn validate(&self) -> Result<(), DomainError> {
        for metric in Metric::ALL {
            validate_score(metric.as_str(), self.get(metric))?;
        }
        Ok(())
    }
}

/// Check one score against the 0–10 scale in 2.5 increments.
///
/// # Errors
/// Returns [`DomainError::Validation`] when `value` is not finite, out of range, or off-step.
pub fn validate_score(field: &str, value: f64) -> Result<(), DomainError> {
    if !value.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&value) {
        return Err(DomainError::Validation(format!(
            "{field} MUST be in [{SCORE_MIN}, {SCORE_MAX}], got {value}"
        )));
    }

    if (value / SCORE_STEP).fract().abs() > f64::EPSILON {
        return Err(DomainError::Validation(format!(
            "{field} MUST be a multiple of {SCORE_STEP}, got {value}"
        )));
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub measurement_id: MeasurementId,
    pub pet_id: PetId,
    #[serde(with = "calendar_date")]
    pub date: Date,
    pub scores: QualityScores,
    #[serde(default)]
    pub custom_value: Option<f64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Measurement {
    /// Validate one assessment before it is appended.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when a score is off-scale, an image reference is
    /// blank, or timestamps are out of order.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.scores.validate()?;

        if let Some(custom_value) = self.custom_value {
            validate_score("custom_value", custom_value)?;
        }

        if self.images.iter().any(|image| image.trim().is_empty()) {
            return Err(DomainError::Validation(
                "image references MUST be non-empty".to_string(),
            ));
        }

        if self.updated_at < self.created_at {
            return Err(DomainError::Validation(
                "measurement updated_at MUST NOT precede created_at".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.scores.total()
    }
}

/// Parse a `YYYY-MM-DD` calendar day.
///
/// # Errors
/// Returns [`DomainError::Parse`] when `raw` is not a valid calendar date.
pub fn parse_calendar_date(raw: &str) -> Result<Date, DomainError> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|err| DomainError::Parse(format!("invalid calendar date {raw}: {err}")))
}

/// # Errors
/// Returns [`DomainError::Parse`] when the date cannot be rendered.
pub fn format_calendar_date(date: Date) -> Result<String, DomainError> {
    date.format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| DomainError::Parse(format!("failed to format date: {err}")))
}

/// Parse an `HH:MM` time of day.
///
/// # Errors
/// Returns [`DomainError::Parse`] when `raw` is not a valid 24-hour clock time.
pub fn parse_time_of_day(raw: &str) -> Result<Time, DomainError> {
    Time::parse(raw, format_description!("[hour]:[minute]"))
        .map_err(|err| DomainError::Parse(format!("invalid time of day {raw}: {err}")))
}

/// # Errors
/// Returns [`DomainError::Parse`] when the time cannot be rendered.
pub fn format_time_of_day(value: Time) -> Result<String, DomainError> {
    value
        .format(format_description!("[hour]:[minute]"))
        .map_err(|err| DomainError::Parse(format!("failed to format time of day: {err}")))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::{date, datetime, time};

    use super::*;

    fn fixture_pet_id(input: &str) -> PetId {
        match PetId::parse(input) {
            Ok(id) => id,
            Err(err) => panic!("invalid fixture ULID {input}: {err}"),
        }
    }

    fn fixture_scores(value: f64) -> QualityScores {
        QualityScores {
            pain: value,
            hunger: value,
            hydration: value,
            hygiene: value,
            happiness: value,
            mobility: value,
        }
    }

    fn fixture_measurement(scores: QualityScores) -> Measurement {
        Measurement {
            measurement_id: MeasurementId::new(),
            pet_id: fixture_pet_id("01K1D3A7E9J5MNNN8F5JVCJY51"),
            date: date!(2026 - 03 - 14),
            scores,
            custom_value: None,
            notes: String::new(),
            images: vec![],
            created_at: datetime!(2026-03-14 08:00 UTC),
            updated_at: datetime!(2026-03-14 08:00 UTC),
        }
    }

    #[test]
    fn species_from_legacy_is_case_insensitive_and_defaults_to_other() {
        assert_eq!(Species::from_legacy("Dog"), Species::Dog);
        assert_eq!(Species::from_legacy(" CAT "), Species::Cat);
        assert_eq!(Species::from_legacy("ferret"), Species::Other);
        assert_eq!(Species::from_legacy(""), Species::Other);
    }

    #[test]
    fn cadence_serializes_in_upper_case() {
        let json = serde_json::to_string(&AssessmentCadence::Daily)
            .unwrap_or_else(|err| panic!("serialize cadence: {err}"));
        assert_eq!(json, "\"DAILY\"");
        assert_eq!(AssessmentCadence::parse("WEEKLY"), Some(AssessmentCadence::Weekly));
        assert_eq!(AssessmentCadence::parse("weekly"), None);
    }

    #[test]
    fn score_grid_accepts_quarter_steps_and_rejects_the_rest() {
        for value in [0.0, 2.5, 5.0, 7.5, 10.0] {
            assert!(validate_score("pain", value).is_ok(), "{value} should be accepted");
        }
        for value in [-2.5, 1.0, 3.3, 12.5, f64::NAN, f64::INFINITY] {
            assert!(validate_score("pain", value).is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn measurement_validation_names_the_offending_metric() {
        let mut scores = fixture_scores(5.0);
        scores.mobility = 4.0;
        let err = match fixture_measurement(scores).validate() {
            Ok(()) => panic!("expected validation failure"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("mobility"));
    }

    #[test]
    fn measurement_rejects_blank_image_and_bad_custom_value() {
        let mut measurement = fixture_measurement(fixture_scores(7.5));
        measurement.images = vec!["file:///a.jpg".to_string(), "  ".to_string()];
        assert!(measurement.validate().is_err());

        measurement.images = vec!["file:///a.jpg".to_string()];
        measurement.custom_value = Some(11.0);
        assert!(measurement.validate().is_err());

        measurement.custom_value = Some(2.5);
        assert!(measurement.validate().is_ok());
    }

    #[test]
    fn pet_validation_rejects_blank_name_and_label() {
        let now = datetime!(2026-01-01 00:00 UTC);
        let mut pet = Pet::new("  ", Species::Cat, now);
        assert!(pet.validate().is_err());

        pet.name = "Mochi".to_string();
        pet.custom_tracking = Some(CustomTracking { label: String::new() });
        assert!(pet.validate().is_err());

        pet.custom_tracking = Some(CustomTracking { label: "seizures".to_string() });
        assert!(pet.validate().is_ok());
        assert!(!pet.requires_follow_up());
    }

    #[test]
    fn measurement_json_uses_calendar_date_and_clock_time() {
        let measurement = fixture_measurement(fixture_scores(5.0));
        let value = serde_json::to_value(&measurement)
            .unwrap_or_else(|err| panic!("serialize measurement: {err}"));
        assert_eq!(value["date"], "2026-03-14");

        let preference = NotificationPreference { enabled: true, time_of_day: Some(time!(19:30)) };
        let value = serde_json::to_value(preference)
            .unwrap_or_else(|err| panic!("serialize preference: {err}"));
        assert_eq!(value["time_of_day"], "19:30");
    }

    #[test]
    fn calendar_and_clock_parsers_reject_garbage() {
        assert_eq!(parse_calendar_date("2026-02-28").ok(), Some(date!(2026 - 02 - 28)));
        assert!(parse_calendar_date("2026-02-30").is_err());
        assert_eq!(parse_time_of_day("07:05").ok(), Some(time!(07:05)));
        assert!(parse_time_of_day("25:00").is_err());
    }

    proptest! {
        #[test]
        fn property_every_grid_point_is_valid_and_totals_add_up(steps in proptest::array::uniform6(0_u8..=4)) {
            let values = steps.map(|step| f64::from(step) * SCORE_STEP);
            let scores = QualityScores {
                pain: values[0],
                hunger: values[1],
                hydration: values[2],
                hygiene: values[3],
                happiness: values[4],
                mobility: values[5],
            };
            prop_assert!(scores.validate().is_ok());
            let expected: f64 = values.iter().sum();
            prop_assert!((scores.total() - expected).abs() < f64::EPSILON);
            prop_assert!((0.0..=60.0).contains(&scores.total()));
        }
    }
}
