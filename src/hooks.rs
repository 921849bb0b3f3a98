//! hooks.rs
//!
//! Shell command hooks: the runner, type-checker and formatter are all
//! user-configurable command templates run through `sh -lc`.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

const OUTPUT_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
pub struct HookOutput {
    pub command: String,
    pub exit_code: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl HookOutput {
    /// stdout then stderr, truncated from the front.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        truncate_output(&text)
    }

    pub fn summary(&self) -> String {
        let text = self.combined();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            format!("exit={}", self.exit_code)
        } else {
            format!("exit={} output={}", self.exit_code, trim_one_line(trimmed))
        }
    }
}

/// Run `template` with `{key}` placeholders expanded, in `cwd`.
pub fn run_hook(
    cwd: &Path,
    template: &str,
    vars: &[(&str, &str)],
    stdin: Option<&str>,
) -> Result<HookOutput> {
    let cmd = expand_template(template, vars);

    let spawn_err = |e: std::io::Error| Error::Command {
        command: cmd.clone(),
        message: e.to_string(),
    };

    let mut child = Command::new("sh")
        .arg("-lc")
        .arg(&cmd)
        .current_dir(cwd)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).map_err(spawn_err)?;
    }

    let out = child.wait_with_output().map_err(spawn_err)?;

    Ok(HookOutput {
        command: cmd.clone(),
        exit_code: out.status.code().unwrap_or(-1),
        success: out.status.success(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

pub fn expand_template(template: &str, vars: &[(&str, &str)]) -> String {
    let map: HashMap<&str, &str> = vars.iter().copied().collect();

    let mut out = template.to_string();
    for (k, v) in map {
        out = out.replace(&format!("{{{k}}}"), v);
    }
    out
}

/// Single-quote `s` for the shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn trim_one_line(s: &str) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() > 180 {
        let mut x: String = line.chars().take(180).collect();
        x.push_str("...");
        x
    } else {
        line.to_string()
    }
}

fn truncate_output(s: &str) -> String {
    let count = s.chars().count();
    if count <= OUTPUT_LIMIT {
        return s.to_string();
    }

    let tail: String = s.chars().skip(count - OUTPUT_LIMIT).collect();
    format!("...truncated...\n{tail}")
}
