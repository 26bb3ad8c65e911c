//! Process-wide tracing subscriber

use std::{fs::File, path::Path, sync::Arc};

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `logging.level`. Output goes to stdout unless
/// `logging.file_path` is set, in which case it is appended to that file
/// without ANSI colours.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(&config.level)?;

    let (writer, ansi) = match config.file_path.as_deref() {
        Some(path) => (BoxMakeWriter::new(Arc::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(is_json(&config.format), writer, ansi))
        .try_init()?;
    Ok(())
}

fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level = parse_log_level(level)?;
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
}

fn is_json(format: &str) -> bool {
    format.trim().eq_ignore_ascii_case("json")
}

fn output_layer<S>(json: bool, writer: BoxMakeWriter, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed()
    }
}

fn open_log_file(path: impl AsRef<Path>) -> anyhow::Result<File> {
    let path = path.as_ref();
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("Cannot open log file {}: {e}", path.display()))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_levels() {
        assert_eq!(parse_log_level(" Warning ").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
        assert!(env_filter("loud").is_err());
        assert!(env_filter("info").is_ok());
    }

    #[test]
    fn test_format_selection() {
        assert!(is_json("json"));
        assert!(is_json(" JSON "));
        assert!(!is_json("pretty"));
        assert!(!is_json(""));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamers.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        assert!(open_log_file(dir.path().join("missing/dir.log")).is_err());
    }
}
