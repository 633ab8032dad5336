use std::ffi::OsStr;
use std::path::Path;

use assert_cmd::{assert::Assert, Command};
use predicates::prelude::*;

use knotgw::knot::{Device, DeviceUpdate, KvPersister, Persister, Snapshot, State};

const DEVICE_ID: &str = "0a1b2c3d4e5f6789";

fn cmd_assert(data_dir: impl AsRef<OsStr>, subcommand: &str) -> Assert {
    let mut cmd = Command::cargo_bin("knotgw").unwrap();
    cmd.env("AE_DATA_DIR", data_dir)
        .env_remove("KNOT_USER_TOKEN")
        .arg(subcommand)
        .assert()
}

fn seed_registry(data_dir: &Path) {
    let mut device = Device::create(DeviceUpdate::new(DEVICE_ID, "dev1"));
    device.token = "abc".into();
    device.state = State::Publishing;

    let store = KvPersister::open(data_dir.join("kvs-db/kvstore.db")).unwrap();
    store
        .save(&Snapshot::from([(DEVICE_ID.to_string(), device)]))
        .unwrap();
}

#[test]
fn devices_lists_stored_registry() {
    let tempdir = tempfile::tempdir().unwrap();
    seed_registry(tempdir.path());

    cmd_assert(tempdir.path(), "devices")
        .success()
        .stdout(predicate::str::contains(DEVICE_ID))
        .stdout(predicate::str::contains("\"SendData\""));
}

#[test]
fn devices_on_empty_store() {
    let tempdir = tempfile::tempdir().unwrap();

    cmd_assert(tempdir.path(), "devices")
        .success()
        .stdout(predicate::str::starts_with("{}"));
}

#[test]
fn run_requires_user_token() {
    let tempdir = tempfile::tempdir().unwrap();

    cmd_assert(tempdir.path(), "run")
        .failure()
        .stderr(predicate::str::contains("KNOT_USER_TOKEN must be set"));
}

#[test]
fn unknown_subcommand_fails() {
    let tempdir = tempfile::tempdir().unwrap();

    cmd_assert(tempdir.path(), "kvs-get")
        .failure()
        .stderr(predicate::str::contains("Subcommand must be one of"));
}
