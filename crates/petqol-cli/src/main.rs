use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use petqol_core::{
    parse_calendar_date, parse_time_of_day, summarize, AssessmentCadence, CustomTracking,
    Measurement, MeasurementId, Pet, PetId, QualityScores, Species,
};
use petqol_store_sqlite::SqliteStore;
use serde_json::Value;
use time::{Date, OffsetDateTime};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const OPEN_FAILURE: &str = "unable to open data";

#[derive(Debug, Parser)]
#[command(name = "pq")]
#[command(about = "Pet quality-of-life tracker")]
struct Cli {
    #[arg(long, env = "PQ_DB", default_value = "./petqol.sqlite3", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Pet {
        #[command(subcommand)]
        command: Box<PetCommand>,
    },
    Measurement {
        #[command(subcommand)]
        command: Box<MeasurementCommand>,
    },
    Summary(RangeArgs),
    Settings {
        #[command(subcommand)]
        command: Box<SettingsCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbExportArgs),
    Import(DbImportArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = false)]
    skip_existing: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum PetCommand {
    Add(PetAddArgs),
    Update(PetUpdateArgs),
    List,
    Show(PetIdArgs),
}

#[derive(Debug, Args)]
struct PetAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    species: SpeciesArg,
    #[arg(long, default_value_t = false)]
    notifications: bool,
    #[arg(long)]
    notification_time: Option<String>,
    #[arg(long, value_enum, default_value_t = CadenceArg::Daily)]
    cadence: CadenceArg,
    #[arg(long)]
    custom_label: Option<String>,
}

#[derive(Debug, Args)]
struct PetUpdateArgs {
    #[arg(long)]
    pet_id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    species: Option<SpeciesArg>,
    #[arg(long)]
    notifications: Option<bool>,
    #[arg(long, conflicts_with = "clear_notification_time")]
    notification_time: Option<String>,
    #[arg(long, default_value_t = false)]
    clear_notification_time: bool,
    #[arg(long)]
    cadence: Option<CadenceArg>,
    #[arg(long, conflicts_with = "clear_custom_label")]
    custom_label: Option<String>,
    #[arg(long, default_value_t = false)]
    clear_custom_label: bool,
}

#[derive(Debug, Args)]
struct PetIdArgs {
    #[arg(long)]
    pet_id: String,
}

#[derive(Debug, Subcommand)]
enum MeasurementCommand {
    Add(MeasurementAddArgs),
    List(RangeArgs),
}

#[derive(Debug, Args)]
struct MeasurementAddArgs {
    #[arg(long)]
    pet_id: String,
    #[arg(long)]
    date: String,
    #[arg(long)]
    pain: f64,
    #[arg(long)]
    hunger: f64,
    #[arg(long)]
    hydration: f64,
    #[arg(long)]
    hygiene: f64,
    #[arg(long)]
    happiness: f64,
    #[arg(long)]
    mobility: f64,
    #[arg(long)]
    custom_value: Option<f64>,
    #[arg(long, default_value = "")]
    notes: String,
    #[arg(long = "image")]
    images: Vec<String>,
}

#[derive(Debug, Args)]
struct RangeArgs {
    #[arg(long)]
    pet_id: String,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Get(SettingsGetArgs),
    Set(SettingsSetArgs),
}

#[derive(Debug, Args)]
struct SettingsGetArgs {
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
struct SettingsSetArgs {
    #[arg(long)]
    key: String,
    #[arg(long)]
    value: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SpeciesArg {
    Dog,
    Cat,
    Other,
}

impl From<SpeciesArg> for Species {
    fn from(value: SpeciesArg) -> Self {
        match value {
            SpeciesArg::Dog => Self::Dog,
            SpeciesArg::Cat => Self::Cat,
            SpeciesArg::Other => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CadenceArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<CadenceArg> for AssessmentCadence {
    fn from(value: CadenceArg) -> Self {
        match value {
            CadenceArg::Daily => Self::Daily,
            CadenceArg::Weekly => Self::Weekly,
            CadenceArg::Monthly => Self::Monthly,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

// Logs go to stderr so stdout stays a single JSON document.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("PQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    debug!(db = %cli.db.display(), "opening store");
    let mut store = SqliteStore::open(&cli.db).context(OPEN_FAILURE)?;

    match cli.command {
        Command::Db { command } => run_db(*command, &mut store),
        Command::Pet { command } => {
            open_data(&mut store)?;
            run_pet(*command, &mut store)
        }
        Command::Measurement { command } => {
            open_data(&mut store)?;
            run_measurement(*command, &mut store)
        }
        Command::Summary(args) => {
            open_data(&mut store)?;
            run_summary(&args, &store)
        }
        Command::Settings { command } => {
            open_data(&mut store)?;
            run_settings(*command, &mut store)
        }
    }
}

fn open_data(store: &mut SqliteStore) -> Result<()> {
    store.migrate().context(OPEN_FAILURE)?;
    Ok(())
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Export(args) => run_db_export(&args, store),
        DbCommand::Import(args) => run_db_import(&args, store),
        DbCommand::Backup(args) => run_db_backup(&args, store),
        DbCommand::Restore(args) => run_db_restore(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty(),
        "inferred_from_legacy": status.inferred_from_legacy
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    if args.dry_run {
        let plan = store.plan_migration()?;
        let status = store.schema_status()?;
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": plan.from_version,
            "target_version": plan.to_version,
            "would_apply_versions": plan.pending_versions,
            "inferred_from_legacy": status.inferred_from_legacy
        }));
    }

    let report = store.migrate().context(OPEN_FAILURE)?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": report.from_version,
        "applied_versions": report.applied_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_export(args: &DbExportArgs, store: &mut SqliteStore) -> Result<()> {
    open_data(store)?;
    let manifest = store.export_snapshot(&args.out)?;
    emit_json(serde_json::json!({
        "out_dir": args.out,
        "manifest": manifest
    }))
}

fn run_db_import(args: &DbImportArgs, store: &mut SqliteStore) -> Result<()> {
    let summary = store.import_snapshot(&args.input, args.skip_existing)?;
    emit_json(serde_json::json!({
        "in_dir": args.input,
        "skip_existing": args.skip_existing,
        "summary": summary
    }))
}

fn run_db_backup(args: &DbBackupArgs, store: &mut SqliteStore) -> Result<()> {
    open_data(store)?;
    store.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_path": args.out,
        "status": "ok"
    }))
}

fn run_db_restore(args: &DbRestoreArgs, store: &mut SqliteStore) -> Result<()> {
    let report = store.restore_database(&args.input)?;
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "restored_from": args.input,
        "applied_versions": report.applied_versions,
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions
    }))
}

fn run_db_integrity_check(store: &mut SqliteStore) -> Result<()> {
    open_data(store)?;
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_pet(command: PetCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        PetCommand::Add(args) => {
            let mut pet = Pet::new(args.name, args.species.into(), OffsetDateTime::now_utc());
            pet.notifications.enabled = args.notifications;
            pet.notifications.time_of_day =
                args.notification_time.as_deref().map(parse_time_of_day).transpose()?;
            pet.assessment_cadence = args.cadence.into();
            pet.custom_tracking = args.custom_label.map(|label| CustomTracking { label });

            store.insert_pet(&pet)?;
            emit_json(serde_json::json!({ "pet": pet }))
        }
        PetCommand::Update(args) => {
            let pet_id = parse_pet_id(&args.pet_id)?;
            let Some(mut pet) = store.get_pet(pet_id)? else {
                return Err(anyhow!("pet not found: {pet_id}"));
            };

            if let Some(name) = args.name {
                pet.name = name;
            }
            if let Some(species) = args.species {
                pet.species = species.into();
            }
            if let Some(enabled) = args.notifications {
                pet.notifications.enabled = enabled;
            }
            if let Some(raw) = args.notification_time.as_deref() {
                pet.notifications.time_of_day = Some(parse_time_of_day(raw)?);
            }
            if args.clear_notification_time {
                pet.notifications.time_of_day = None;
            }
            if let Some(cadence) = args.cadence {
                pet.assessment_cadence = cadence.into();
            }
            if let Some(label) = args.custom_label {
                pet.custom_tracking = Some(CustomTracking { label });
            }
            if args.clear_custom_label {
                pet.custom_tracking = None;
            }

            let updated = store.update_pet(&pet)?;
            emit_json(serde_json::json!({ "pet": updated }))
        }
        PetCommand::List => {
            let pets = store.list_pets()?;
            let follow_up = pets
                .iter()
                .filter(|pet| pet.requires_follow_up())
                .map(|pet| pet.pet_id.to_string())
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "pets": pets,
                "requires_follow_up": follow_up
            }))
        }
        PetCommand::Show(args) => {
            let pet_id = parse_pet_id(&args.pet_id)?;
            let Some(pet) = store.get_pet(pet_id)? else {
                return Err(anyhow!("pet not found: {pet_id}"));
            };
            emit_json(serde_json::json!({ "pet": pet }))
        }
    }
}

fn run_measurement(command: MeasurementCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        MeasurementCommand::Add(args) => {
            let now = OffsetDateTime::now_utc();
            let measurement = Measurement {
                measurement_id: MeasurementId::new(),
                pet_id: parse_pet_id(&args.pet_id)?,
                date: parse_date_arg("--date", &args.date)?,
                scores: QualityScores {
                    pain: args.pain,
                    hunger: args.hunger,
                    hydration: args.hydration,
                    hygiene: args.hygiene,
                    happiness: args.happiness,
                    mobility: args.mobility,
                },
                custom_value: args.custom_value,
                notes: args.notes,
                images: args.images,
                created_at: now,
                updated_at: now,
            };

            store.append_measurement(&measurement)?;
            emit_json(serde_json::json!({
                "measurement": measurement,
                "total": measurement.total()
            }))
        }
        MeasurementCommand::List(args) => {
            let (pet_id, from, to) = parse_range(&args)?;
            let measurements = store.list_measurements(pet_id, from, to)?;
            emit_json(serde_json::json!({
                "pet_id": pet_id.to_string(),
                "measurements": measurements
            }))
        }
    }
}

fn run_summary(args: &RangeArgs, store: &SqliteStore) -> Result<()> {
    let (pet_id, from, to) = parse_range(args)?;
    if store.get_pet(pet_id)?.is_none() {
        return Err(anyhow!("pet not found: {pet_id}"));
    }

    let measurements = store.list_measurements(pet_id, from, to)?;
    emit_json(serde_json::json!({
        "pet_id": pet_id.to_string(),
        "summary": summarize(&measurements)
    }))
}

fn run_settings(command: SettingsCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        SettingsCommand::Get(args) => {
            let value = store.get_setting(&args.key)?;
            emit_json(serde_json::json!({
                "key": args.key,
                "value": value
            }))
        }
        SettingsCommand::Set(args) => {
            store.set_setting(&args.key, &args.value)?;
            emit_json(serde_json::json!({
                "key": args.key,
                "value": args.value,
                "status": "ok"
            }))
        }
    }
}

fn parse_range(args: &RangeArgs) -> Result<(PetId, Option<Date>, Option<Date>)> {
    let pet_id = parse_pet_id(&args.pet_id)?;
    let from = args.from.as_deref().map(|raw| parse_date_arg("--from", raw)).transpose()?;
    let to = args.to.as_deref().map(|raw| parse_date_arg("--to", raw)).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(anyhow!("--from {from} is after --to {to}"));
        }
    }
    Ok((pet_id, from, to))
}

fn parse_pet_id(raw: &str) -> Result<PetId> {
    PetId::parse(raw).with_context(|| format!("invalid --pet-id {raw}"))
}

fn parse_date_arg(flag: &str, raw: &str) -> Result<Date> {
    parse_calendar_date(raw).with_context(|| format!("invalid {flag} value"))
}
