//! The `logger` module configures `env_logger`.
//!
//! Every setup function is safe to call repeatedly; only the first call in a
//! process installs the logger. Tests call [`setup`] at the top of each case.

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ogp=info";

fn install(mut builder: env_logger::Builder) {
    // A logger is already installed when this fails; keep it.
    let _ = builder.format_timestamp_millis().try_init();
}

/// Configure logging with `filter`, ignoring `RUST_LOG`.
pub fn setup_with(filter: &str) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(filter);
    install(builder);
}

/// Configure logging from `RUST_LOG`, falling back to `filter`.
pub fn setup_with_default(filter: &str) {
    install(env_logger::Builder::from_env(
        env_logger::Env::new().default_filter_or(filter),
    ));
}

/// Configure logging from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn setup() {
    setup_with_default(DEFAULT_FILTER);
}
