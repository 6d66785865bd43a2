use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Library crates and the three binaries at `info`, everything else at `warn`.
const DEFAULT_FILTER: &str =
    "ans_collector=info,ans_parser=info,collector=info,parser=info,api=info,warn";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the workspace crates log at `info`.
/// Output goes to stderr so stdout stays free for run summaries.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    // try_init: tests and embedding callers may have installed one already
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
