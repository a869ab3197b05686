use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Initialize logging.
///
/// Lines look like `[2024-01-01 12:00:00] [INFO] [hotdsp_lib::audio] message`.
/// With a log file they are appended there instead of stderr, which keeps
/// the console free for the control prompt. `RUST_LOG` overrides the level.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            timestamp,
            record.level(),
            record.target(),
            record.args()
        )
    });

    let mut file_error = None;
    if let Some(path) = log_file {
        // Create logs directory if it doesn't exist
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(e),
        }
    }

    if builder.try_init().is_err() {
        // Already initialized (tests, embedding)
        return;
    }

    if let (Some(path), Some(e)) = (log_file, file_error) {
        log::warn!("Could not open log file {:?}, logging to stderr: {}", path, e);
    }
    log::info!("hotdsp {} started", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("hotdsp.log");
        init_logging(false, Some(&path));
        init_logging(true, None);
        assert!(path.exists());
    }
}
