use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

/// Write a minimal config pointing every path into the scratch directory.
fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let root = dir.path();
    let config = format!(
        r#"
[system]
job_path = "{root}/jobs"
jobfiles_path = "{root}/jobfiles"
result_path = "{root}/results"
database_path = "{root}/jobs.db"

[machines.bbb]
hostname = "bbb"

[suites]
rt = ["1_rt-tests_cyclictest"]
standard = ["2_stress-ng"]
"#,
        root = root.display()
    );
    let path = root.join("config.toml");
    fs::write(&path, config).unwrap();
    path
}

fn lavarun() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap()
}

#[test]
fn help_lists_subcommands() {
    lavarun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("submit"))
        .stdout(predicates::str::contains("jobs"));
}

#[test]
fn jobs_list_on_empty_ledger_succeeds() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    lavarun()
        .args(["--config", config.to_str().unwrap(), "jobs", "bbb", "list"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn jobs_commands_reject_unknown_machines() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    lavarun()
        .args(["--config", config.to_str().unwrap(), "jobs", "nope", "list"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("not configured"));
}

#[test]
fn list_tests_walks_the_template_tree() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    let suite = dir.path().join("jobs/rt/smoke");
    fs::create_dir_all(&suite).unwrap();
    fs::create_dir_all(dir.path().join("jobs/boards")).unwrap();
    fs::write(
        suite.join("0005-cyclictest.jinja2"),
        "{% set job_name = 'cyclictest' %}\n",
    )
    .unwrap();
    fs::write(suite.join("0010-hackbench.jinja2"), "job_name: hackbench\n").unwrap();

    lavarun()
        .args(["--config", config.to_str().unwrap(), "list-tests"])
        .assert()
        .success()
        .stdout(predicates::str::contains("rt/smoke:"))
        .stdout(predicates::str::contains("- cyclictest"))
        .stdout(predicates::str::contains("- hackbench"));
}

#[test]
fn non_integer_job_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    lavarun()
        .args([
            "--config",
            config.to_str().unwrap(),
            "jobs",
            "bbb",
            "results",
            "not-a-number",
        ])
        .assert()
        .failure();
}
