//! log4rs set-up: a rolling `app.log`, a dedicated `metrics.log` for the
//! `idbquery::metrics` target and, optionally, a `dev.log` for `devlog!`
//! output.

use crate::errors::DbError;
use log::LevelFilter;
use log4rs::Handle;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

pub const METRICS_TARGET: &str = "idbquery::metrics";
pub const DEV_TARGET: &str = crate::utils::devlog::TARGET;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;

static HANDLE: Mutex<Option<Handle>> = Mutex::new(None);

/// Initializes logging from `log4rs.yaml` in the working directory.
///
/// # Errors
/// `Logging` if the file is missing, invalid, or a logger is already set.
pub fn init() -> Result<(), DbError> {
    init_path(Path::new("log4rs.yaml"))
}

/// # Errors
/// `Logging` if the file is missing, invalid, or a logger is already set.
pub fn init_path(path: &Path) -> Result<(), DbError> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())
        .map_err(|e| DbError::Logging(format!("{}: {e}", path.display())))
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, DbError> {
    let roller = FixedWindowRoller::builder()
        .build(&base.join(format!("{stem}.{{}}.log")).to_string_lossy(), keep)
        .map_err(|e| DbError::Logging(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))
        .map_err(|e| DbError::Logging(e.to_string()))
}

/// Configures process-wide logging. Calling it again replaces the previous
/// configuration.
/// - `dir`: base directory for log files; current directory when `None`
/// - `level`: off|error|warn|info|debug|trace (default info)
/// - `retention`: rolled files kept per log (default 7)
///
/// # Errors
/// `Logging` when the directory or an appender cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<u32>,
) -> Result<(), DbError> {
    configure_logging_with_dev(dir, level, retention, false)
}

/// As [`configure_logging`]; with `enable_dev` the `devlog!` channel is also
/// written to `dev.log`.
///
/// # Errors
/// `Logging` when the directory or an appender cannot be created.
pub fn configure_logging_with_dev(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<u32>,
    enable_dev: bool,
) -> Result<(), DbError> {
    let base = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&base)
        .map_err(|e| DbError::Logging(format!("create {}: {e}", base.display())))?;
    let keep = retention.unwrap_or(7);
    let lvl = parse_level(level);

    let appender = |stem: &str| -> Result<Appender, DbError> {
        Ok(Appender::builder().build(stem, Box::new(rolling(&base, stem, keep)?)))
    };
    let routed = |stem: &str, target: &str, level: LevelFilter| {
        Logger::builder()
            .appender(stem)
            .additive(false)
            .build(target, level)
    };

    let mut builder = Config::builder()
        .appender(appender("app")?)
        .appender(appender("metrics")?)
        .logger(routed("metrics", METRICS_TARGET, lvl));
    builder = if enable_dev {
        builder
            .appender(appender("dev")?)
            .logger(routed("dev", DEV_TARGET, LevelFilter::Trace))
    } else {
        let silenced = Logger::builder()
            .additive(false)
            .build(DEV_TARGET, LevelFilter::Off);
        builder.logger(silenced)
    };
    let config = builder
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| DbError::Logging(e.to_string()))?;

    let mut handle = HANDLE.lock();
    match handle.as_ref() {
        Some(h) => h.set_config(config),
        None => {
            let h =
                log4rs::init_config(config).map_err(|e| DbError::Logging(e.to_string()))?;
            *handle = Some(h);
        }
    }
    Ok(())
}

/// Configures logging from `IDBQUERY_LOG_DIR`, `IDBQUERY_LOG_LEVEL`,
/// `IDBQUERY_LOG_RETENTION` and `IDBQUERY_DEVLOG`.
///
/// # Errors
/// As [`configure_logging_with_dev`].
pub fn configure_from_env() -> Result<(), DbError> {
    let dir = std::env::var("IDBQUERY_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("IDBQUERY_LOG_LEVEL").ok();
    let retention = std::env::var("IDBQUERY_LOG_RETENTION")
        .ok()
        .and_then(|s| s.parse::<u32>().ok());
    let dev = std::env::var("IDBQUERY_DEVLOG")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging_with_dev(dir.as_deref(), level.as_deref(), retention, dev)
}
