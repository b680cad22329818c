//! Per-invocation execution settings.

use std::fmt;
use std::sync::Arc;

use log::Level;
use serde::Deserialize;

use crate::interaction::RuleSet;
use crate::transport::ChannelOptions;

/// Receives the Result (joined standard output) of a finished command.
pub type ResultCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Settings for one `run_shell`, `execute` or `execute_background` call.
///
/// Taken by reference; a call never mutates them.
#[derive(Clone)]
pub struct ExecutionSettings {
    /// Log every output line through the `log` facade.
    pub logging: bool,

    /// Level for standard output lines.
    pub output_log_level: Level,

    /// Level for standard error lines.
    pub error_log_level: Level,

    /// Rules answering prompts in the output.
    pub interaction: Option<RuleSet>,

    /// Invoked with the Result once the command succeeded.
    pub callback: Option<ResultCallback>,

    /// Request a pseudo-terminal.
    pub pty: bool,

    /// Log a non-zero exit status instead of failing.
    pub ignore_error: bool,

    /// Log what would run without opening a channel.
    pub dry_run: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            logging: true,
            output_log_level: Level::Info,
            error_log_level: Level::Error,
            interaction: None,
            callback: None,
            pty: false,
            ignore_error: false,
            dry_run: false,
        }
    }
}

impl ExecutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_log_levels(mut self, output: Level, error: Level) -> Self {
        self.output_log_level = output;
        self.error_log_level = error;
        self
    }

    pub fn with_interaction(mut self, rules: RuleSet) -> Self {
        self.interaction = Some(rules);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn with_ignore_error(mut self, ignore_error: bool) -> Self {
        self.ignore_error = ignore_error;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Layer plain-data overrides on top of these settings.
    pub fn apply(mut self, overrides: &SettingsOverride) -> Self {
        if let Some(logging) = overrides.logging {
            self.logging = logging;
        }
        if let Some(level) = overrides.output_log_level {
            self.output_log_level = level;
        }
        if let Some(level) = overrides.error_log_level {
            self.error_log_level = level;
        }
        if let Some(pty) = overrides.pty {
            self.pty = pty;
        }
        if let Some(ignore_error) = overrides.ignore_error {
            self.ignore_error = ignore_error;
        }
        if let Some(dry_run) = overrides.dry_run {
            self.dry_run = dry_run;
        }
        self
    }

    pub(crate) fn channel_options(&self) -> ChannelOptions {
        ChannelOptions { pty: self.pty }
    }

    pub(crate) fn invoke_callback(&self, result: &str) {
        if let Some(callback) = &self.callback {
            callback(result);
        }
    }
}

impl fmt::Debug for ExecutionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSettings")
            .field("logging", &self.logging)
            .field("output_log_level", &self.output_log_level)
            .field("error_log_level", &self.error_log_level)
            .field("interaction", &self.interaction.as_ref().map(RuleSet::len))
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("pty", &self.pty)
            .field("ignore_error", &self.ignore_error)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Serializable subset of [`ExecutionSettings`]; unset fields keep the
/// value they are applied to.
///
/// ```rust
/// use sshwright::driver::{ExecutionSettings, SettingsOverride};
///
/// let overrides: SettingsOverride =
///     serde_json::from_str(r#"{"output_log_level": "debug", "ignore_error": true}"#).unwrap();
/// let settings = ExecutionSettings::default().apply(&overrides);
/// assert!(settings.ignore_error);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsOverride {
    pub logging: Option<bool>,
    pub output_log_level: Option<Level>,
    pub error_log_level: Option<Level>,
    pub pty: Option<bool>,
    pub ignore_error: Option<bool>,
    pub dry_run: Option<bool>,
}

impl SettingsOverride {
    /// Combine two layers; values set in `other` win.
    pub fn merge(&self, other: &SettingsOverride) -> SettingsOverride {
        SettingsOverride {
            logging: other.logging.or(self.logging),
            output_log_level: other.output_log_level.or(self.output_log_level),
            error_log_level: other.error_log_level.or(self.error_log_level),
            pty: other.pty.or(self.pty),
            ignore_error: other.ignore_error.or(self.ignore_error),
            dry_run: other.dry_run.or(self.dry_run),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ExecutionSettings::default();
        assert!(settings.logging);
        assert_eq!(settings.output_log_level, Level::Info);
        assert_eq!(settings.error_log_level, Level::Error);
        assert!(settings.interaction.is_none());
        assert!(!settings.ignore_error);
        assert_eq!(settings.channel_options(), ChannelOptions { pty: false });
    }

    #[test]
    fn test_override_deserialize_and_apply() {
        let overrides: SettingsOverride = serde_json::from_str(
            r#"{"logging": false, "error_log_level": "warn", "pty": true}"#,
        )
        .unwrap();
        let settings = ExecutionSettings::default().apply(&overrides);

        assert!(!settings.logging);
        assert_eq!(settings.output_log_level, Level::Info);
        assert_eq!(settings.error_log_level, Level::Warn);
        assert!(settings.pty);
    }

    #[test]
    fn test_override_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<SettingsOverride>(r#"{"colour": true}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_override_merge_prefers_later_layer() {
        let global = SettingsOverride {
            logging: Some(false),
            dry_run: Some(true),
            ..Default::default()
        };
        let local = SettingsOverride {
            dry_run: Some(false),
            ..Default::default()
        };
        let merged = global.merge(&local);
        assert_eq!(merged.logging, Some(false));
        assert_eq!(merged.dry_run, Some(false));
    }

    #[test]
    fn test_callback_receives_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let settings =
            ExecutionSettings::new().with_callback(move |r| sink.lock().unwrap().push(r.to_string()));

        settings.invoke_callback("ok");
        assert_eq!(*seen.lock().unwrap(), vec!["ok"]);
        assert!(format!("{settings:?}").contains("<callback>"));
    }
}
