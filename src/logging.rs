use std::fs::OpenOptions;
use std::path::Path;

use crate::config::Config;

/// Initialise `env_logger`. `RUST_LOG` wins over the configured level.
///
/// With a `log_file` configured, records are appended to it instead of stderr.
pub fn init(config: &Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level));

    let mut sink_error = None;
    if let Some(path) = &config.log_file {
        match open_sink(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => sink_error = Some((path.display().to_string(), e)),
        }
    }

    if let Err(e) = builder.try_init() {
        eprintln!("Logger already initialised: {}", e);
        return;
    }

    if let Some((path, e)) = sink_error {
        log::warn!("Could not open log file {}, logging to stderr: {}", path, e);
    }
}

fn open_sink(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_is_created_with_parent_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("halo.log");

        {
            use std::io::Write;
            let mut file = open_sink(&path).unwrap();
            writeln!(file, "first").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_sink(&path).unwrap();
            writeln!(file, "second").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
