//! # duet-client
//!
//! Real-time sync engine of the duet two-party messenger: live message and
//! conversation feeds with a snapshot-to-live handoff, recipient resolution,
//! conversation creation with dedup, and the composer.

pub mod composer;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod feed;
pub mod models;
pub mod queries;
pub mod resolver;
pub mod session;
pub mod state;
pub mod transform;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ClientError, Result};
pub use state::AppState;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("duet_client=debug,duet_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
