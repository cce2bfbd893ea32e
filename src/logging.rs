use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Default filter: this crate at `level`, everything else at warn.
pub fn default_directive(level: Level) -> String {
    format!("warn,audio_scheduler={}", level.as_str().to_lowercase())
}

/// Install the global console subscriber. `RUST_LOG` overrides `level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names_the_crate() {
        assert_eq!(default_directive(Level::DEBUG), "warn,audio_scheduler=debug");
        assert_eq!(default_directive(Level::INFO), "warn,audio_scheduler=info");
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(Level::INFO);
        init_logging(Level::DEBUG);
        tracing::info!("logging initialized");
    }
}
