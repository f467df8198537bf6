use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}

fn run_pq<I, S>(db: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_pq"))
        .arg("--db")
        .arg(db)
        .args(args)
        .env_remove("PQ_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute pq binary: {err}"))
}

fn run_json<I, S>(db: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_pq(db, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "pq command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let value: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(value["contract_version"], "cli.v1");
    value
}

fn run_failure<I, S>(db: &Path, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_pq(db, args);
    assert!(
        !output.status.success(),
        "pq command unexpectedly succeeded:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn versions(value: &Value, key: &str) -> Vec<u64> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .filter_map(Value::as_u64)
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn add_pet(db: &Path, name: &str, species: &str) -> String {
    let added = run_json(db, ["pet", "add", "--name", name, "--species", species]);
    as_str(&added["pet"], "pet_id").to_string()
}

fn add_uniform_measurement(db: &Path, pet_id: &str, date: &str, score: &str) -> Value {
    run_json(
        db,
        [
            "measurement",
            "add",
            "--pet-id",
            pet_id,
            "--date",
            date,
            "--pain",
            score,
            "--hunger",
            score,
            "--hydration",
            score,
            "--hygiene",
            score,
            "--happiness",
            score,
            "--mobility",
            score,
        ],
    )
}

#[test]
fn schema_version_dry_run_and_migrate_report_the_pass() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");

    let status = run_json(&db, ["db", "schema-version"]);
    assert_eq!(as_u64(&status, "current_version"), 0);
    assert_eq!(as_u64(&status, "target_version"), 7);
    assert_eq!(versions(&status, "pending_versions"), vec![1, 7]);
    assert_eq!(status["up_to_date"], false);

    let dry_run = run_json(&db, ["db", "migrate", "--dry-run"]);
    assert_eq!(dry_run["dry_run"], true);
    assert_eq!(versions(&dry_run, "would_apply_versions"), vec![1, 7]);
    let still_pending = run_json(&db, ["db", "schema-version"]);
    assert_eq!(as_u64(&still_pending, "current_version"), 0);

    let migrated = run_json(&db, ["db", "migrate"]);
    assert_eq!(as_u64(&migrated, "before_version"), 0);
    assert_eq!(versions(&migrated, "applied_versions"), vec![1, 7]);
    assert_eq!(as_u64(&migrated, "after_version"), 7);
    assert_eq!(migrated["up_to_date"], true);

    let again = run_json(&db, ["db", "migrate"]);
    assert!(versions(&again, "applied_versions").is_empty());
}

#[test]
fn first_open_creates_placeholder_pet_flagged_for_follow_up() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");

    let listed = run_json(&db, ["pet", "list"]);
    let pets = listed["pets"].as_array().unwrap_or_else(|| panic!("pets array: {listed}"));
    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0]["name"], "PET_REQUIRES_MIGRATION");
    assert_eq!(pets[0]["species"], "other");
    assert_eq!(pets[0]["notifications"]["enabled"], false);
    assert_eq!(pets[0]["assessment_cadence"], "DAILY");
    assert_eq!(listed["requires_follow_up"].as_array().map(Vec::len), Some(1));
}

#[test]
fn pet_add_update_and_show_round_trip() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");

    let added = run_json(
        &db,
        [
            "pet",
            "add",
            "--name",
            "Mochi",
            "--species",
            "cat",
            "--notifications",
            "--notification-time",
            "19:30",
            "--cadence",
            "weekly",
            "--custom-label",
            "seizures",
        ],
    );
    let pet_id = as_str(&added["pet"], "pet_id").to_string();
    assert_eq!(added["pet"]["notifications"]["time_of_day"], "19:30");
    assert_eq!(added["pet"]["assessment_cadence"], "WEEKLY");
    assert_eq!(added["pet"]["custom_tracking"]["label"], "seizures");

    let updated = run_json(
        &db,
        [
            "pet",
            "update",
            "--pet-id",
            pet_id.as_str(),
            "--name",
            "Mochi II",
            "--notifications",
            "false",
            "--clear-custom-label",
        ],
    );
    assert_eq!(updated["pet"]["name"], "Mochi II");
    assert_eq!(updated["pet"]["notifications"]["enabled"], false);
    assert_eq!(updated["pet"]["custom_tracking"], Value::Null);
    assert_eq!(updated["pet"]["created_at"], added["pet"]["created_at"]);

    let shown = run_json(&db, ["pet", "show", "--pet-id", pet_id.as_str()]);
    assert_eq!(shown["pet"], updated["pet"]);

    let stderr = run_failure(&db, ["pet", "show", "--pet-id", "not-a-ulid"]);
    assert!(stderr.contains("invalid --pet-id"), "stderr:\n{stderr}");
}

#[test]
fn measurements_and_summary_follow_the_date_range() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");
    let pet_id = add_pet(&db, "Biscuit", "dog");

    let first = add_uniform_measurement(&db, &pet_id, "2026-03-01", "5");
    assert_eq!(first["total"].as_f64(), Some(30.0));
    add_uniform_measurement(&db, &pet_id, "2026-03-02", "7.5");
    add_uniform_measurement(&db, &pet_id, "2026-03-03", "2.5");

    let listed = run_json(
        &db,
        ["measurement", "list", "--pet-id", pet_id.as_str(), "--from", "2026-03-01", "--to", "2026-03-02"],
    );
    let measurements =
        listed["measurements"].as_array().unwrap_or_else(|| panic!("measurements: {listed}"));
    assert_eq!(measurements.len(), 2);
    assert_eq!(measurements[0]["date"], "2026-03-01");
    assert_eq!(measurements[1]["date"], "2026-03-02");

    let summary = run_json(
        &db,
        ["summary", "--pet-id", pet_id.as_str(), "--from", "2026-03-01", "--to", "2026-03-02"],
    );
    let summary = &summary["summary"];
    assert_eq!(as_u64(summary, "measurement_count"), 2);
    assert_eq!(summary["mean_total"].as_f64(), Some(37.5));
    assert_eq!(as_u64(summary, "good_days"), 2);
    assert_eq!(summary["trend"], "improving");

    let empty = run_json(&db, ["summary", "--pet-id", pet_id.as_str(), "--from", "2027-01-01"]);
    assert_eq!(empty["summary"], Value::Null);
}

#[test]
fn invalid_scores_and_unknown_pets_are_rejected() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");
    let pet_id = add_pet(&db, "Pepper", "other");

    let stderr = run_failure(
        &db,
        [
            "measurement",
            "add",
            "--pet-id",
            pet_id.as_str(),
            "--date",
            "2026-03-01",
            "--pain",
            "3",
            "--hunger",
            "5",
            "--hydration",
            "5",
            "--hygiene",
            "5",
            "--happiness",
            "5",
            "--mobility",
            "5",
        ],
    );
    assert!(stderr.contains("pain"), "stderr:\n{stderr}");

    let stranger = "01K1D3A7E9J5MNNN8F5JVCJY51";
    let stderr = run_failure(&db, ["summary", "--pet-id", stranger]);
    assert!(stderr.contains("pet not found"), "stderr:\n{stderr}");
}

#[test]
fn settings_set_then_get() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");

    let missing = run_json(&db, ["settings", "get", "--key", "theme"]);
    assert_eq!(missing["value"], Value::Null);

    run_json(&db, ["settings", "set", "--key", "theme", "--value", "dark"]);
    let found = run_json(&db, ["settings", "get", "--key", "theme"]);
    assert_eq!(found["value"], "dark");
}

#[test]
fn export_import_backup_and_restore_move_data_between_databases() {
    let dir = temp_dir();
    let source_db = dir.path().join("source.sqlite3");
    let pet_id = add_pet(&source_db, "Luna", "cat");
    add_uniform_measurement(&source_db, &pet_id, "2026-04-01", "10");

    let export_dir = dir.path().join("export");
    let exported = run_json(&source_db, ["db", "export", "--out", path_str(&export_dir)]);
    assert_eq!(exported["manifest"]["files"].as_array().map(Vec::len), Some(2));
    assert!(export_dir.join("manifest.json").exists());

    let target_db = dir.path().join("target.sqlite3");
    let imported = run_json(&target_db, ["db", "import", "--in", path_str(&export_dir)]);
    assert_eq!(as_u64(&imported["summary"], "imported_pets"), 2);
    assert_eq!(as_u64(&imported["summary"], "imported_measurements"), 1);

    let duplicate = run_failure(&target_db, ["db", "import", "--in", path_str(&export_dir)]);
    assert!(duplicate.contains("already exists"), "stderr:\n{duplicate}");
    let skipped = run_json(
        &target_db,
        ["db", "import", "--in", path_str(&export_dir), "--skip-existing"],
    );
    assert_eq!(as_u64(&skipped["summary"], "skipped_existing_measurements"), 1);

    let backup_file = dir.path().join("backups").join("source-backup.sqlite3");
    let backup = run_json(&source_db, ["db", "backup", "--out", path_str(&backup_file)]);
    assert_eq!(backup["status"], "ok");

    let restored_db = dir.path().join("restored.sqlite3");
    let restored = run_json(&restored_db, ["db", "restore", "--in", path_str(&backup_file)]);
    assert_eq!(as_u64(&restored, "current_version"), 7);
    let shown = run_json(&restored_db, ["pet", "show", "--pet-id", pet_id.as_str()]);
    assert_eq!(shown["pet"]["name"], "Luna");

    let integrity = run_json(&restored_db, ["db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], true);
    assert_eq!(as_u64(&integrity, "orphaned_measurements"), 0);
}

#[test]
fn integrity_check_migrates_a_fresh_database_first() {
    let dir = temp_dir();
    let db = dir.path().join("petqol.sqlite3");

    let integrity = run_json(&db, ["db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], true);
    assert_eq!(as_u64(&integrity, "orphaned_measurements"), 0);
    assert_eq!(as_u64(&integrity["schema_status"], "current_version"), 7);
    assert!(versions(&integrity["schema_status"], "pending_versions").is_empty());
}

#[test]
fn unreadable_database_fails_with_open_context() {
    let dir = temp_dir();
    let db = dir.path().join("missing-parent").join("petqol.sqlite3");

    let stderr = run_failure(&db, ["pet", "list"]);
    assert!(stderr.contains("unable to open data"), "stderr:\n{stderr}");
}
