use std::path::Path;

#[derive(Debug)]
pub enum LogInitError {
    Fern(fern::InitError),
    Io(std::io::Error),
    SetLogger(log::SetLoggerError),
}

impl std::fmt::Display for LogInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogInitError::Fern(e) => write!(f, "failed to initialize logger: {}", e),
            LogInitError::Io(e) => write!(f, "failed to open log file: {}", e),
            LogInitError::SetLogger(e) => write!(f, "failed to set logger: {}", e),
        }
    }
}

impl From<fern::InitError> for LogInitError {
    fn from(e: fern::InitError) -> Self {
        LogInitError::Fern(e)
    }
}

impl From<std::io::Error> for LogInitError {
    fn from(e: std::io::Error) -> Self {
        LogInitError::Io(e)
    }
}

impl From<log::SetLoggerError> for LogInitError {
    fn from(e: log::SetLoggerError) -> Self {
        LogInitError::SetLogger(e)
    }
}

/// Initializes the global `log` facade.
///
/// Always logs to stdout. When `file_dir` is `Some`, additionally appends to
/// `{file_dir}/mpsdlink-{date}.log`, rotated by calendar day on process restart.
pub fn init(level: log::LevelFilter, file_dir: Option<&Path>) -> Result<(), LogInitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(dir) = file_dir {
        std::fs::create_dir_all(dir)?;
        let file_name = format!("mpsdlink-{}.log", chrono::Local::now().format("%Y-%m-%d"));
        let log_file = fern::log_file(dir.join(file_name))?;
        dispatch = dispatch.chain(log_file);
    }

    dispatch.apply()?;
    Ok(())
}

/// Logs at `debug` level only when the named subsystem trace flag is enabled
/// via the environment, e.g. `MPSDLINK_TRACE_SOCIAL=1`. Mirrors the teacher's
/// `autmc_log::debug_if!` macro, generalized to per-subsystem flags so a noisy
/// friend-graph batch or heartbeat loop can be silenced independently.
#[macro_export]
macro_rules! trace_if {
    ($subsystem:literal, $($arg:tt)+) => {
        match std::env::var(concat!("MPSDLINK_TRACE_", $subsystem)) {
            Ok(v) if v == "1" => log::debug!($($arg)+),
            _ => {}
        }
    };
}
