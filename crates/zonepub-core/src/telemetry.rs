//! Log output for the zonepub binary.
//!
//! Our own crates log at the requested level, dependencies only warn.
//! `RUST_LOG` replaces these directives entirely. Log lines go to stderr so
//! stdout carries nothing but reports.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Targets that follow the requested level.
const OWN_TARGETS: &[&str] = &[
    "zonepub",
    "zonepub_cli",
    "zonepub_core",
    "zonepub_pipeline",
    "zonepub_state",
];

/// Filter directives used when `RUST_LOG` is unset.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

fn output_layer(json: bool, level: Level) -> Box<dyn Layer<Registry> + Send + Sync> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    }
}

/// Install the global subscriber. Only the first call in a process wins.
pub fn init_tracing(json: bool, level: Level) {
    let _ = tracing_subscriber::registry()
        .with(output_layer(json, level))
        .try_init();
}
