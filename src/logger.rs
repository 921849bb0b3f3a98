use std::collections::VecDeque;
use std::time::Instant;

pub const MAX_LOGS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
    pub at: Instant,
}

/// Bounded in-memory run log. Every line is mirrored to `tracing`.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: VecDeque<LogLine>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: LogLevel, msg: impl Into<String>) {
        let text = msg.into();

        match level {
            LogLevel::Info => tracing::info!("{text}"),
            LogLevel::Success => tracing::info!(success = true, "{text}"),
            LogLevel::Warn => tracing::warn!("{text}"),
            LogLevel::Error => tracing::error!("{text}"),
        }

        if self.lines.len() >= MAX_LOGS {
            self.lines.pop_front();
        }

        self.lines.push_back(LogLine {
            level,
            text,
            at: Instant::now(),
        });
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn success(&mut self, msg: impl Into<String>) {
        self.log(LogLevel::Success, msg);
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.iter().filter(|l| l.level == level).count()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_line() {
        let mut log = RunLog::new();
        for i in 0..MAX_LOGS + 5 {
            log.info(format!("line {i}"));
        }

        assert_eq!(log.len(), MAX_LOGS);
        assert_eq!(log.lines().next().map(|l| l.text.as_str()), Some("line 5"));
    }

    #[test]
    fn counts_by_level() {
        let mut log = RunLog::new();
        log.warn("a");
        log.warn("b");
        log.error("c");

        assert_eq!(log.count(LogLevel::Warn), 2);
        assert_eq!(log.count(LogLevel::Error), 1);
        assert_eq!(log.count(LogLevel::Success), 0);
    }
}
