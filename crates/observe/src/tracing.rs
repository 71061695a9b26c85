use {
    std::{path::Path, sync::Mutex},
    tracing_subscriber::EnvFilter,
};

/// Initializes the global subscriber with the given filter directives,
/// writing to stderr or appending to the configured log file.
///
/// Must be called exactly once, before any task starts logging.
pub fn initialize(env_filter: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}
