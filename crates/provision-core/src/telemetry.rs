//! Log output for the provisioner.
//!
//! Step progress, stamp decisions and download activity are all emitted as
//! `tracing` events. [`init_tracing`] routes them to stderr; stdout carries
//! only the command's own output (plan listings, `provision report` JSON).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP stack crates that are chatty at debug level during artifact fetches.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Filter used when `RUST_LOG` is unset: the chosen verbosity for our own
/// events, warnings only from the HTTP stack.
fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    for krate in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{}=warn", krate));
    }
    directives
}

/// Install the process-wide subscriber. `json` switches to one JSON object
/// per line for log shippers; `level` is ignored when `RUST_LOG` is set.
/// Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
}
