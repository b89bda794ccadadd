use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

mod common;

#[test]
fn generate_completions_does_not_need_any_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("conveyor")?;
    cmd.env_remove("CONVEYOR_CONFIG")
        .arg("generate-completions")
        .arg("bash");

    cmd.assert().success().stdout(predicate::str::contains("conveyor"));
    Ok(())
}

#[test]
fn generate_completions_rejects_an_unknown_shell() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("conveyor")?;
    cmd.arg("generate-completions").arg("powershell");

    cmd.assert().failure();
    Ok(())
}

#[test]
fn run_job_without_a_job_name_is_a_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("conveyor")?;
    cmd.arg("run-job").arg("1");

    cmd.assert().failure();
    Ok(())
}

#[test]
fn subcommands_needing_the_database_fail_fast_without_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("conveyor")?;
    cmd.env("CONVEYOR_CONFIG", common::MISSING_CONFIG_PATH)
        .arg("status")
        .arg("1")
        .arg("jira-sync");

    cmd.assert().failure();
    Ok(())
}

#[test]
fn no_subcommand_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("conveyor")?;
    cmd.env("CONVEYOR_CONFIG", common::MISSING_CONFIG_PATH);

    cmd.assert().failure();
    Ok(())
}
