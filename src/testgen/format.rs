// Optional formatter pass over generated test code.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::hooks::{run_hook, shell_quote};
use crate::logger::RunLog;

pub trait Formatter {
    fn format(&self, path: &str, content: &str) -> Result<String>;
}

/// Pipes content through a shell command, e.g.
/// `npx prettier --stdin-filepath {path}`.
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    repo_root: PathBuf,
    command: String,
}

impl CommandFormatter {
    pub fn new(repo_root: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            command: command.into(),
        }
    }
}

impl Formatter for CommandFormatter {
    fn format(&self, path: &str, content: &str) -> Result<String> {
        let out = run_hook(
            &self.repo_root,
            &self.command,
            &[("path", &shell_quote(path))],
            Some(content),
        )?;

        if !out.success {
            return Err(Error::Command {
                command: out.command.clone(),
                message: out.summary(),
            });
        }
        if out.stdout.trim().is_empty() {
            return Err(Error::Command {
                command: out.command,
                message: "formatter produced no output".into(),
            });
        }

        Ok(out.stdout)
    }
}

/// Formatted content, or the input unchanged when formatting fails.
pub fn format_or_keep(
    formatter: Option<&dyn Formatter>,
    path: &str,
    content: String,
    log: &mut RunLog,
) -> String {
    let Some(f) = formatter else {
        return content;
    };

    match f.format(path, &content) {
        Ok(formatted) => formatted,
        Err(e) => {
            log.warn(format!("format {path}: {e}"));
            content
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipes_through_command() {
        let dir = tempfile::tempdir().unwrap();
        let f = CommandFormatter::new(dir.path(), "sed 's/  */ /g'");
        assert_eq!(f.format("a.test.ts", "it(  'x')\n").unwrap(), "it( 'x')\n");
    }

    #[test]
    fn failing_formatter_keeps_input() {
        let dir = tempfile::tempdir().unwrap();
        let f = CommandFormatter::new(dir.path(), "cat >/dev/null; exit 2");
        let mut log = RunLog::new();

        let out = format_or_keep(Some(&f), "a.test.ts", "it('x')\n".into(), &mut log);
        assert_eq!(out, "it('x')\n");
        assert_eq!(log.count(crate::logger::LogLevel::Warn), 1);
    }
}
