//! Read-only views over the job template tree.

use anyhow::Result;
use log::error;

use crate::config::Config;
use crate::template;

/// Render and print every matching job definition without submitting.
pub fn show_jobs(
    config: &Config,
    machine_name: &str,
    flavors: &[String],
    suite: &str,
    test: Option<&str>,
    url_suffix: Option<&str>,
) -> Result<()> {
    let machine = config.machine(machine_name)?;
    let ctx = super::build_context(config, machine, url_suffix);

    println!("Machine: {machine_name} ({})", machine.hostname);
    if let Some(image) = &machine.image {
        println!("Kernel image: {image}");
    }
    if let Some(arch) = &machine.arch {
        println!("Arch: {arch}");
    }
    if let Some(cross_compile) = &machine.cross_compile {
        println!("Cross compile: {cross_compile}");
    }
    if let Some(cc) = &machine.cc {
        println!("CC: {cc}");
    }
    if let Some(build_path) = &machine.build_path {
        println!("Build path: {}", build_path.display());
    }
    println!("Flavors: {}", flavors.join(", "));
    println!("Test suite: {suite}");

    let mut total = 0;
    for flavor in flavors {
        let suite_path = config.system.job_path.join(flavor).join(suite);
        if !suite_path.exists() {
            error!("test suite path does not exist: {}", suite_path.display());
            continue;
        }

        for template_file in super::suite_templates(&suite_path)? {
            let rendered = match template::render(&config.system.job_path, &template_file, &ctx) {
                Ok(rendered) => rendered,
                Err(err) => {
                    error!("cannot render {}: {err:#}", template_file.display());
                    continue;
                }
            };

            let name = super::rendered_job_name(&rendered, &template_file);
            if let Some(wanted) = test {
                if name != wanted {
                    continue;
                }
            }

            println!("\n--- Job: {name} ({}) ---", template_file.display());
            println!("{rendered}");
            total += 1;
        }
    }

    println!("\nTotal jobs generated: {total}");
    Ok(())
}

/// List every test the template tree declares, grouped by flavor and suite,
/// optionally restricted to given flavors or one suite.
pub fn list_tests(
    config: &Config,
    only_flavors: Option<&[String]>,
    only_suite: Option<&str>,
) -> Result<()> {
    let job_path = &config.system.job_path;

    let mut flavors: Vec<_> = std::fs::read_dir(job_path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir() && p.file_name().is_some_and(|n| n != "boards"))
                .collect()
        })
        .unwrap_or_default();
    flavors.sort();

    println!("Available test suites and tests:");
    for flavor_path in flavors {
        let flavor = flavor_path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
        if let Some(wanted) = only_flavors {
            if !wanted.iter().any(|f| f == flavor) {
                continue;
            }
        }

        let mut suites: Vec<_> = match std::fs::read_dir(&flavor_path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect(),
            Err(err) => {
                error!("cannot read flavor {}: {err}", flavor_path.display());
                continue;
            }
        };
        suites.sort();

        for suite_path in suites {
            let suite = suite_path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
            if only_suite.is_some_and(|wanted| wanted != suite) {
                continue;
            }
            println!("\n{flavor}/{suite}:");
            for template_file in super::suite_templates(&suite_path)? {
                println!("  - {}", template::extract_test_name(&template_file));
            }
        }
    }
    Ok(())
}
