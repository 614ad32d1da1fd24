//! Console log section policy.
//!
//! The most recent lines win. At most `max_lines` are considered, older ones
//! are dropped until the rendered section fits `budget`, and when not even
//! the newest line fits, a fixed placeholder replaces the section. Lines are
//! never cut in the middle.

use std::fmt;

use crate::config::LogLimits;

/// Renderable log section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSection {
    /// Nothing was logged.
    Empty,
    /// The newest `shown` lines, out of `total`.
    Tail { shown: Vec<String>, total: usize },
    /// Even the newest line alone exceeds the budget.
    TooLong { total: usize },
}

impl LogSection {
    pub fn from_logs(logs: &[String], limits: LogLimits) -> Self {
        if logs.is_empty() {
            return Self::Empty;
        }
        let total = logs.len();
        let start = total.saturating_sub(limits.max_lines.max(1));

        for from in start..total {
            let candidate = Self::Tail {
                shown: logs[from..].to_vec(),
                total,
            };
            if candidate.to_string().chars().count() <= limits.budget {
                return candidate;
            }
        }
        Self::TooLong { total }
    }
}

impl fmt::Display for LogSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Tail { shown, total } => {
                if shown.len() < *total {
                    if shown.len() == 1 {
                        f.write_str("Only showing last log:\n")?;
                    } else {
                        writeln!(f, "Showing last {} logs:", shown.len())?;
                    }
                }
                write!(f, "```js\n{}\n```", shown.join("\n"))
            }
            Self::TooLong { total: 1 } => f.write_str("Log is too long to be displayed."),
            Self::TooLong { .. } => f.write_str("Logs are too long to be displayed."),
        }
    }
}
