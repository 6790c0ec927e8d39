//! Tracing setup for binaries and tests embedding the engine.

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns false if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("info,ifacepolicy=debug");
        assert!(!init_tracing("info"));
    }
}
