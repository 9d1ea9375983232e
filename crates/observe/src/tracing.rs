use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber with the given env filter
/// directives (same syntax as `RUST_LOG`).
///
/// Idempotent so tests can call it repeatedly.
pub fn initialize(env_filter: &str) {
    static INIT: std::sync::Once = std::sync::Once::new();
    let filter = EnvFilter::new(env_filter);
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(atty())
            .init();
    });
}

fn atty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}
