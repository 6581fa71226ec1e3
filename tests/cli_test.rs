use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const FIXTURE: &str = "tests/fixtures/charges.csv";

fn bulkpay() -> Command {
    let mut cmd = Command::new(cargo_bin!("bulkpay"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn execute(args: &[&str]) -> Command {
    let mut cmd = bulkpay();
    cmd.args(["execute", FIXTURE, "--reference", "RECALL-PRO3000"])
        .args(["--base-delay-ms", "1", "--chunk-pause-ms", "0"])
        .args(args);
    cmd
}

#[test]
fn test_key_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
    let first = bulkpay()
        .args(["key", "agency_042", "booking_7891", "create_payment"])
        .output()?;
    let second = bulkpay()
        .args(["key", "agency_042", "booking_7891", "create_payment"])
        .output()?;

    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    let key = String::from_utf8(first.stdout)?;
    assert_eq!(key.trim().len(), 32);
    Ok(())
}

#[test]
fn test_key_rejects_unknown_action() {
    bulkpay()
        .args(["key", "agency_042", "booking_7891", "capture"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown action kind"));
}

#[test]
fn test_plan_prints_preview_and_skips() {
    bulkpay()
        .args(["plan", FIXTURE, "--reference", "RECALL-PRO3000"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Batch RECALL-PRO3000: 4 targets, total 1022.00 eur",
        ))
        .stdout(predicate::str::contains("partial_remainder: 1 (299.00)"))
        .stdout(predicate::str::contains("ch_004: already fully settled"))
        .stdout(predicate::str::contains("ch_005: blocked by state 'disputed'"));
}

#[test]
fn test_plan_with_filter_as_json() {
    bulkpay()
        .args(["plan", FIXTURE, "--reference", "RECALL-PRO3000"])
        .args(["--filter", "product=pro_3000", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\": 3"))
        .stdout(predicate::str::contains("\"reason\": \"already_fully_settled\""));
}

#[test]
fn test_execute_writes_audit_log() {
    execute(&["--filter", "product=pro_3000"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "subject_id,key,amount,outcome,record_id,error_kind,reason,guidance,attempts,elapsed_ms,timestamp,replay_protected",
        ))
        .stdout(predicate::str::is_match(r"ch_002,[0-9a-f]{32},299\.00,succeeded,re_\d+,,,,1,").unwrap())
        .stdout(predicate::str::contains("ch_004").not());
}

#[test]
fn test_execute_retries_flaky_charge() {
    execute(&["--flaky", "ch_001=2"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"ch_001,[0-9a-f]{32},349\.00,succeeded,re_\d+,,,,3,").unwrap());
}

#[test]
fn test_execute_fails_when_an_item_fails() {
    execute(&["--fail", "ch_003"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("ch_003"))
        .stdout(predicate::str::contains("failed,,permanent"))
        .stdout(predicate::str::contains("request rejected as invalid; fix the parameters"))
        .stderr(predicate::str::contains("3 succeeded, 1 failed"));
}

#[test]
fn test_execute_json_report() {
    execute(&["--fail", "ch_003", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"matches\": true"))
        .stdout(predicate::str::contains("\"failed_count\": 1"))
        .stdout(predicate::str::contains("\"subject_id\": \"ch_003\""));
}

#[test]
fn test_malformed_input_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "id,amount,currency")?;
    writeln!(file, "ch_1,-5.00,eur")?;

    bulkpay()
        .args(["plan"])
        .arg(file.path())
        .args(["--reference", "R1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be negative"));
    Ok(())
}
