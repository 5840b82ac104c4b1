use tracing_subscriber::EnvFilter;

/// Initializes the process-wide subscriber.
///
/// The filter is taken from `env_key` when set, from `RUST_LOG` otherwise,
/// and falls back to `default_filter`. Under systemd the journald layer is
/// preferred so unit logs stay structured; everywhere else a stderr
/// formatter is installed.
pub fn init(
    default_filter: &str,
    env_key: &str,
) {
    let filter = EnvFilter::try_from_env(env_key)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    #[cfg(target_os = "linux")]
    if under_systemd() {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                return;
            }
            Err(err) => eprintln!(
                "journald unavailable, logging to stderr instead: {err}"
            ),
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(target_os = "linux")]
fn under_systemd() -> bool {
    std::env::var_os("JOURNAL_STREAM").is_some()
        || std::env::var_os("INVOCATION_ID").is_some()
}
