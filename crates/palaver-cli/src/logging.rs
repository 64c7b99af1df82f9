//! Subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;

use palaver_core::config::LoggingConfig;

/// Filter directives: base level first, then per-crate overrides.
pub fn filter_directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };
    std::iter::once(level.to_string())
        .chain(config.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` wins unless `verbose` is set.
pub fn init_logging(config: &LoggingConfig, verbose: bool) {
    let directives = filter_directives(config, verbose);
    let filter = if verbose {
        EnvFilter::new(&directives)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = config.format == "json";
    let stdout = config.output == "stdout";
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}
