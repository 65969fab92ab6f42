//! Log output for the server.
//!
//! The filter comes from `RUST_LOG` and defaults to `info`. Library spans
//! and events from `leaseflake` (lease acquisition, renew retries, lost
//! leases, reclaimed leases) flow through the same subscriber.
//!
//! ```bash
//! RUST_LOG=leaseflake=debug,info leaseflake-server --log-json
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `json` switches the console output to one
/// JSON object per line for log shippers.
pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_thread_ids(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_file(true),
            )
            .try_init()?;
    }

    Ok(())
}
