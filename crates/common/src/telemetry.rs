use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "FORUM_LOG_FORMAT";

/// Installs the global tracing subscriber for a service binary.
///
/// `RUST_LOG` wins over `fallback_filter` when set. `FORUM_LOG_FORMAT=json`
/// switches to JSON lines. Uses `try_init` so repeated calls are harmless.
pub fn init_tracing(fallback_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV).map(|value| is_json_format(&value)).unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    drop(result);
}

fn is_json_format(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("json")
}
