//! Logging and tracing configuration
//!
//! Everything goes to stderr: stdout is reserved for the test runner's
//! captured output, which is printed once the run completes.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `--verbose`), WARN for
/// dependencies.
pub fn init_cli(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("cucumber_wire_runner=debug,warn")
    } else {
        EnvFilter::new("cucumber_wire_runner=info,warn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_enables_debug() {
        assert!(default_filter(true).to_string().contains("cucumber_wire_runner=debug"));
        assert!(default_filter(false).to_string().contains("cucumber_wire_runner=info"));
    }
}
