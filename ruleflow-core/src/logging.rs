use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

use crate::errors::{CoreError, Result};

/// Initializes the tracing subscriber used by the batch tools.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the given
/// directive, defaulting to `info`. Initializing twice is reported as
/// an error rather than panicking, since tests and embedding callers
/// may already have a subscriber installed.
pub fn init_tracing(directive: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.unwrap_or("info")));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .try_init()
        .map_err(|err| CoreError::General(err.to_string()))
}
