//! Job template rendering.
//!
//! LAVA job descriptions are kept as Jinja2-style templates (`*.jinja2`), one
//! suite per directory. This module loads the per-board job context and
//! renders a template into the final YAML job text: `{% include "file" %}`
//! directives are resolved against the suite's base search path and every
//! `{{ key }}` reference is substituted from the context. The output is
//! structured text, so no escaping is ever applied, and rendering the same
//! template with the same context is byte-identical.

pub mod splitter;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow, bail};
use log::error;
use regex::Regex;
use serde_yaml::Value;

/// Maximum include nesting before rendering is treated as cyclic.
const MAX_INCLUDE_DEPTH: usize = 10;

/// Template variables for one board, loaded from a YAML descriptor.
///
/// Immutable after load except for the two fields the submission pipeline
/// injects before rendering: the kernel artifact URL suffix and the device
/// tag list.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    data: serde_yaml::Mapping,
}

impl JobContext {
    /// Load the board descriptor, trying the given path, the current
    /// directory and `~/.config/lavarun/` in turn.
    ///
    /// A missing or unparseable descriptor degrades to an empty context with
    /// an error log; rendering will then fail on the first referenced key.
    pub fn load(board_file: &Path) -> Self {
        let mut candidates = vec![board_file.to_path_buf()];
        if let Some(basename) = board_file.file_name() {
            candidates.push(PathBuf::from(basename));
            if let Some(config_dir) = dirs::config_dir() {
                candidates.push(config_dir.join("lavarun").join(basename));
            }
        }

        for path in &candidates {
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(text) => match serde_yaml::from_str::<serde_yaml::Mapping>(&text) {
                    Ok(data) => return Self { data },
                    Err(err) => {
                        error!("YAML parse error in job context {}: {err}", path.display());
                        return Self::default();
                    }
                },
                Err(err) => {
                    error!("error reading job context {}: {err}", path.display());
                }
            }
        }

        error!("job context not found; tried: {candidates:?}");
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.data.insert(Value::String(key.to_string()), value);
    }

    /// Set the device tag list (injected by the caller before rendering).
    pub fn set_tags(&mut self, tags: &[String]) {
        let seq = tags
            .iter()
            .map(|t| Value::String(t.clone()))
            .collect::<Vec<_>>();
        self.insert("tags", Value::Sequence(seq));
    }

    /// Append a suffix to a string-valued key, typically `kernel_url`.
    pub fn append_str(&mut self, key: &str, suffix: &str) {
        let current = match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        self.insert(key, Value::String(format!("{current}{suffix}")));
    }

    /// Resolve a dotted path (`suite.max_latency`) into the context.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Per-suite maximum-latency threshold for result classification.
    ///
    /// The key is the suite name's trailing `_` token with hyphens normalized
    /// to underscores; a missing threshold behaves as `-1`, which forces any
    /// `*max-latency*` record to display as failing.
    pub fn max_latency(&self, suite: &str) -> i64 {
        let token = suite.rsplit('_').next().unwrap_or(suite).replace('-', "_");
        self.get(&token)
            .and_then(|entry| entry.get("max_latency"))
            .and_then(value_as_i64)
            .unwrap_or(-1)
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a context value into template output text.
///
/// Sequences come out in YAML flow style (`['a', 'b']`) so they stay valid
/// inside a single line of the job document.
fn value_to_text(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Sequence(seq) => {
            let mut items = Vec::with_capacity(seq.len());
            for item in seq {
                let text = match item {
                    Value::String(s) => format!("'{s}'"),
                    other => value_to_text(other)?,
                };
                items.push(text);
            }
            Ok(format!("[{}]", items.join(", ")))
        }
        Value::Mapping(_) | Value::Tagged(_) => {
            bail!("context value is not renderable as template text")
        }
    }
}

/// Resolve `{% include "file" %}` directives against the search path.
fn expand_includes(search_path: &Path, text: &str) -> Result<String> {
    let include_re =
        Regex::new(r#"\{%\s*include\s+"([^"]+)"\s*%\}\n?"#).context("invalid include pattern")?;

    let mut current = text.to_string();
    for _ in 0..MAX_INCLUDE_DEPTH {
        let Some(found) = include_re.captures(&current) else {
            return Ok(current);
        };
        let Some(whole) = found.get(0) else {
            return Ok(current);
        };
        let name = &found[1];
        let included = std::fs::read_to_string(search_path.join(name))
            .with_context(|| format!("cannot include template `{name}`"))?;

        let mut next = String::with_capacity(current.len() + included.len());
        next.push_str(&current[..whole.start()]);
        next.push_str(&included);
        next.push_str(&current[whole.end()..]);
        current = next;
    }

    bail!("template include nesting exceeds {MAX_INCLUDE_DEPTH} levels (cycle?)")
}

/// Render a template file with the given context.
///
/// `template_file` may be an explicit path or a name resolved relative to
/// `search_path`. A context key referenced by the template but absent from
/// the context is a hard render error, never silently blanked.
pub fn render(search_path: &Path, template_file: &Path, ctx: &JobContext) -> Result<String> {
    let path = if template_file.exists() {
        template_file.to_path_buf()
    } else {
        search_path.join(template_file)
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read template {}", path.display()))?;

    let text = expand_includes(search_path, &text)?;

    let var_re = Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}")
        .context("invalid variable pattern")?;

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for caps in var_re.captures_iter(&text) {
        let Some(whole) = caps.get(0) else { continue };
        let key = &caps[1];
        let value = ctx
            .lookup(key)
            .ok_or_else(|| anyhow!("template references undefined context key `{key}`"))?;
        rendered.push_str(&text[last..whole.start()]);
        rendered.push_str(&value_to_text(value)?);
        last = whole.end();
    }
    rendered.push_str(&text[last..]);

    Ok(rendered)
}

/// Extract the test name a template declares, falling back to the file name.
///
/// Templates carry a `job_name` declaration either as a YAML key or inside a
/// Jinja2 `set` tag; both forms are tolerated, quotes and closing tags are
/// stripped.
pub fn extract_test_name(template_path: &Path) -> String {
    if let Ok(content) = std::fs::read_to_string(template_path) {
        for line in content.lines() {
            if !line.contains("job_name") {
                continue;
            }
            let value = if let Some((_, rest)) = line.split_once('=') {
                rest
            } else if let Some((_, rest)) = line.split_once(':') {
                rest
            } else {
                continue;
            };
            let value = value.split("%}").next().unwrap_or(value);
            let value = value.trim().trim_matches(['\'', '"']);
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    template_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .trim_end_matches(".jinja2")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx_from_yaml(yaml: &str) -> JobContext {
        JobContext {
            data: serde_yaml::from_str(yaml).unwrap(),
        }
    }

    #[test]
    fn renders_scalars_and_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("job.jinja2");
        fs::write(
            &template,
            "job_name: smoke\nurl: {{ kernel_url }}\ntags: {{ tags }}\ncount: {{ count }}\n",
        )
        .unwrap();

        let mut ctx = ctx_from_yaml("kernel_url: http://x/vmlinuz\ncount: 4\n");
        ctx.set_tags(&["bbb".to_string()]);

        let out = render(dir.path(), &template, &ctx).unwrap();
        assert_eq!(
            out,
            "job_name: smoke\nurl: http://x/vmlinuz\ntags: ['bbb']\ncount: 4\n"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("job.jinja2");
        fs::write(&template, "a: {{ a }}\nb: {{ nested.b }}\n").unwrap();

        let ctx = ctx_from_yaml("a: one\nnested:\n  b: two\n");
        let first = render(dir.path(), &template, &ctx).unwrap();
        let second = render(dir.path(), &template, &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "a: one\nb: two\n");
    }

    #[test]
    fn missing_key_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("job.jinja2");
        fs::write(&template, "url: {{ kernel_url }}\n").unwrap();

        let err = render(dir.path(), &template, &JobContext::default()).unwrap_err();
        assert!(err.to_string().contains("kernel_url"));
    }

    #[test]
    fn resolves_includes_against_search_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.jinja2"), "device: {{ device }}\n").unwrap();
        let template = dir.path().join("job.jinja2");
        fs::write(&template, "{% include \"base.jinja2\" %}\njob_name: smoke\n").unwrap();

        let ctx = ctx_from_yaml("device: bbb\n");
        let out = render(dir.path(), &template, &ctx).unwrap();
        assert_eq!(out, "device: bbb\njob_name: smoke\n");
    }

    #[test]
    fn include_cycles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("loop.jinja2"),
            "{% include \"loop.jinja2\" %}\n",
        )
        .unwrap();

        let err = render(dir.path(), Path::new("loop.jinja2"), &JobContext::default());
        assert!(err.is_err());
    }

    #[test]
    fn max_latency_uses_trailing_suite_token() {
        let ctx = ctx_from_yaml("cyclictest:\n  max_latency: 100\n");
        assert_eq!(ctx.max_latency("1_rt-tests_cyclictest"), 100);
        assert_eq!(ctx.max_latency("cyclic-test"), -1);
    }

    #[test]
    fn extract_test_name_handles_set_tags_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let set_style = dir.path().join("0005-cyclictest.jinja2");
        fs::write(&set_style, "{% set job_name = 'cyclictest' %}\n").unwrap();
        assert_eq!(extract_test_name(&set_style), "cyclictest");

        let yaml_style = dir.path().join("hackbench.jinja2");
        fs::write(&yaml_style, "job_name: \"hackbench\"\n").unwrap();
        assert_eq!(extract_test_name(&yaml_style), "hackbench");

        let bare = dir.path().join("signaltest.jinja2");
        fs::write(&bare, "actions: []\n").unwrap();
        assert_eq!(extract_test_name(&bare), "signaltest");
    }
}
