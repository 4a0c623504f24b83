//! Tracing bootstrap: env-filtered subscriber on stderr.
//!
//! `RUST_LOG` controls verbosity; `--verbose` raises the default to debug
//! for the weft crates only.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "warn,weft=debug,cli=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
