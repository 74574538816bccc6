//! Command implementations behind the CLI surface.

pub mod inspect;
pub mod jobs;
pub mod submit;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde_yaml::Value;

use crate::config::{Config, MachineConfig};
use crate::config::cli_args::{CliArgs, Command};
use crate::runner::Runner;
use crate::template::JobContext;

/// Dispatch one parsed invocation.
pub async fn run(args: &CliArgs, config: &Config, runner: &Runner) -> Result<()> {
    match &args.command {
        Command::Submit {
            machine,
            flavors,
            suite,
            test,
            duration,
            url_suffix,
        } => {
            submit::submit(
                config,
                runner,
                &submit::SubmitArgs {
                    machine,
                    flavors,
                    suite,
                    test: test.as_deref(),
                    duration: duration.as_deref(),
                    url_suffix: url_suffix.as_deref(),
                },
            )
            .await
        }
        Command::ShowJobs {
            machine,
            flavors,
            suite,
            test,
            url_suffix,
        } => inspect::show_jobs(
            config,
            machine,
            flavors,
            suite,
            test.as_deref(),
            url_suffix.as_deref(),
        ),
        Command::ListTests { flavors, suite } => {
            inspect::list_tests(config, flavors.as_deref(), suite.as_deref())
        }
        Command::Jobs { machine, command } => jobs::run(config, runner, machine, command).await,
    }
}

/// Build the render context for a machine: board descriptor, injected device
/// tag and artifact URL suffix, then the machine's extra template variables.
pub(crate) fn build_context(
    config: &Config,
    machine: &MachineConfig,
    url_suffix: Option<&str>,
) -> JobContext {
    let mut ctx = JobContext::load(&config.board_file(&machine.hostname));
    if let Some(suffix) = url_suffix {
        ctx.append_str("kernel_url", suffix);
    }
    ctx.set_tags(std::slice::from_ref(&machine.hostname));
    for (key, value) in &machine.vars {
        ctx.insert(key, toml_to_yaml(value));
    }
    ctx
}

fn toml_to_yaml(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number((*i).into()),
        toml::Value::Float(f) => Value::Number((*f).into()),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Sequence(items.iter().map(toml_to_yaml).collect()),
        toml::Value::Table(table) => Value::Mapping(
            table
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), toml_to_yaml(v)))
                .collect(),
        ),
    }
}

/// Sorted template files of one suite directory.
pub(crate) fn suite_templates(suite_path: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(suite_path)
        .with_context(|| format!("cannot read test suite {}", suite_path.display()))?;

    let mut templates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("jinja2") && path.is_file()
        })
        .collect();
    templates.sort();
    Ok(templates)
}

/// The job name a rendered template declares, used for `--test` filtering.
pub(crate) fn rendered_job_name(rendered: &str, template: &Path) -> String {
    if let Ok(doc) = serde_yaml::from_str::<Value>(rendered) {
        if let Some(name) = doc.get("job_name").and_then(Value::as_str) {
            return name.to_string();
        }
    }
    crate::template::extract_test_name(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_vars_reach_the_context() {
        let mut config = Config::default();
        config.machines.insert(
            "bbb".to_string(),
            MachineConfig {
                hostname: "bbb".to_string(),
                image: None,
                arch: None,
                cross_compile: None,
                cc: None,
                build_path: None,
                vars: [
                    ("boot_method".to_string(), toml::Value::String("u-boot".into())),
                    ("cpus".to_string(), toml::Value::Integer(4)),
                ]
                .into_iter()
                .collect(),
            },
        );

        let machine = config.machine("bbb").unwrap();
        let ctx = build_context(&config, machine, Some("-rt"));
        assert_eq!(
            ctx.get("boot_method"),
            Some(&Value::String("u-boot".to_string()))
        );
        assert_eq!(ctx.get("cpus"), Some(&Value::Number(4.into())));
        assert_eq!(
            ctx.get("tags"),
            Some(&Value::Sequence(vec![Value::String("bbb".to_string())]))
        );
        // No board descriptor loaded, so the suffix lands on an empty URL.
        assert_eq!(ctx.get("kernel_url"), Some(&Value::String("-rt".to_string())));
    }

    #[test]
    fn suite_templates_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0010-hackbench.jinja2"), "").unwrap();
        std::fs::write(dir.path().join("0005-cyclictest.jinja2"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let templates = suite_templates(dir.path()).unwrap();
        let names: Vec<_> = templates
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["0005-cyclictest.jinja2", "0010-hackbench.jinja2"]);
    }

    #[test]
    fn job_name_prefers_the_rendered_document() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("0005-cyclictest.jinja2");
        std::fs::write(&template, "actions: []\n").unwrap();

        assert_eq!(
            rendered_job_name("job_name: cyclictest\n", &template),
            "cyclictest"
        );
        // Unparseable output falls back to the template declaration.
        assert_eq!(
            rendered_job_name(": not yaml [", &template),
            "0005-cyclictest"
        );
    }
}
