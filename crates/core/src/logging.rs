//! Logging setup plans: filter selection and the rolling file sink.
//!
//! The core crate only composes plans; the host applies them to a
//! `tracing` subscriber. This keeps subscriber installation (a global,
//! once-per-process affair) out of library code.

use std::fs;
use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};

pub const DEFAULT_LOG_FILTER: &str = "info";
/// ORT is chatty at startup; keep it quiet unless explicitly requested.
pub const DEFAULT_NOISE_FILTER: &str = "ort=error";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "snapgrid";
pub const DEFAULT_LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub default_log_filter: String,
    pub noise_filter: String,
    pub include_noise_filter_when_implicit: bool,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbose: 0,
            cli_log_filter: None,
            rust_log_env: None,
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
            noise_filter: DEFAULT_NOISE_FILTER.to_string(),
            include_noise_filter_when_implicit: true,
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

#[derive(Debug)]
pub struct LoggingInitPlan {
    pub filter: String,
    pub file_sink: FileSinkPlan,
}

#[derive(Debug)]
pub enum FileSinkPlan {
    Ready(ReadyFileSinkPlan),
    Fallback(FallbackFileSinkPlan),
}

#[derive(Debug)]
pub struct ReadyFileSinkPlan {
    pub log_dir: PathBuf,
    pub retention_files: usize,
    pub appender: RollingFileAppender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFileSinkPlan {
    pub attempted_log_dir: Option<PathBuf>,
    pub retention_files: usize,
    pub reason: String,
}

impl FileSinkPlan {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn log_dir(&self) -> Option<&PathBuf> {
        match self {
            Self::Ready(plan) => Some(&plan.log_dir),
            Self::Fallback(plan) => plan.attempted_log_dir.as_ref(),
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Fallback(plan) => Some(plan.reason.as_str()),
        }
    }
}

pub fn compose_logging_init_plan(options: &LoggingInitOptions) -> LoggingInitPlan {
    LoggingInitPlan {
        filter: select_log_filter(options),
        file_sink: build_file_sink_plan(options),
    }
}

pub fn build_file_sink_plan(options: &LoggingInitOptions) -> FileSinkPlan {
    let retention_files = normalize_retention_files(options.retention_files);

    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: None,
            retention_files,
            reason: "file sink disabled: data_dir is not configured".to_string(),
        });
    };

    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            retention_files,
            reason: format!("failed to create log directory: {error}"),
        });
    }

    let appender_builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix(DEFAULT_LOG_FILE_SUFFIX)
        .max_log_files(retention_files);

    match appender_builder.build(&log_dir) {
        Ok(appender) => FileSinkPlan::Ready(ReadyFileSinkPlan {
            log_dir,
            retention_files,
            appender,
        }),
        Err(error) => FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            retention_files,
            reason: format!("failed to initialize rolling file sink: {error}"),
        }),
    }
}

/// Filter precedence: explicit CLI filter, then -v/-vv, then RUST_LOG,
/// then the built-in default. The noise filter is prepended only when
/// the user did not ask for anything explicit.
pub fn select_log_filter(options: &LoggingInitOptions) -> String {
    let user_filter = select_user_filter(options);
    let should_include_noise = options.include_noise_filter_when_implicit
        && options.cli_log_filter.is_none()
        && options.verbose == 0;

    if should_include_noise && !options.noise_filter.trim().is_empty() {
        format!("{},{user_filter}", options.noise_filter)
    } else {
        user_filter
    }
}

fn normalize_retention_files(retention_files: usize) -> usize {
    if retention_files == 0 {
        DEFAULT_LOG_RETENTION_FILES
    } else {
        retention_files
    }
}

fn select_user_filter(options: &LoggingInitOptions) -> String {
    if let Some(filter) = options.cli_log_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        options.default_log_filter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LoggingInitOptions {
        LoggingInitOptions::default()
    }

    #[test]
    fn default_filter_includes_noise_suppression() {
        assert_eq!(select_log_filter(&options()), "ort=error,info");
    }

    #[test]
    fn cli_filter_wins_and_disables_noise_suppression() {
        let opts = LoggingInitOptions {
            cli_log_filter: Some("snapgrid_core=trace".to_string()),
            rust_log_env: Some("warn".to_string()),
            verbose: 2,
            ..options()
        };
        assert_eq!(select_log_filter(&opts), "snapgrid_core=trace");
    }

    #[test]
    fn verbose_flags_beat_rust_log() {
        let opts = LoggingInitOptions {
            rust_log_env: Some("warn".to_string()),
            verbose: 1,
            ..options()
        };
        assert_eq!(select_log_filter(&opts), "debug");

        let opts = LoggingInitOptions {
            verbose: 2,
            ..options()
        };
        assert_eq!(select_log_filter(&opts), "trace");
    }

    #[test]
    fn rust_log_is_used_when_nothing_explicit() {
        let opts = LoggingInitOptions {
            rust_log_env: Some("snapgrid_core=debug".to_string()),
            ..options()
        };
        assert_eq!(select_log_filter(&opts), "ort=error,snapgrid_core=debug");
    }

    #[test]
    fn missing_data_dir_yields_fallback_sink() {
        let plan = build_file_sink_plan(&options());
        assert!(!plan.is_ready());
        assert!(plan.fallback_reason().unwrap().contains("data_dir"));
    }

    #[test]
    fn ready_sink_creates_the_log_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = LoggingInitOptions {
            data_dir: Some(dir.path().to_path_buf()),
            ..options()
        };
        let plan = build_file_sink_plan(&opts);
        assert!(plan.is_ready());
        assert!(dir.path().join(DEFAULT_LOG_DIR_NAME).is_dir());
    }

    #[test]
    fn zero_retention_is_normalized_to_default() {
        let opts = LoggingInitOptions {
            retention_files: 0,
            ..options()
        };
        let plan = build_file_sink_plan(&opts);
        match plan {
            FileSinkPlan::Fallback(fallback) => {
                assert_eq!(fallback.retention_files, DEFAULT_LOG_RETENTION_FILES)
            }
            FileSinkPlan::Ready(_) => panic!("expected fallback without data_dir"),
        }
    }
}
