// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod bill;
pub mod classify;
pub mod config;
pub mod error;
pub mod store;

// Discovery: upstream adapters, range probing, scheduling
pub mod ingest;
pub mod scan;

// Output: post text, summary cards, publishers
pub mod format;
pub mod notify;
pub mod render;

pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::bill::{BillKey, BillRecord, ChamberType};
pub use crate::config::AppConfig;
pub use crate::ingest::types::{BillSource, CandidateWindow};
pub use crate::notify::{Dispatcher, PostPayload, Publisher};
pub use crate::scan::{CycleReport, Scanner};
pub use crate::store::SeenStore;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing(format: config::LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("billwatch=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = match format {
        config::LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        config::LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    if res.is_err() {
        // Already installed (tests, embedding); keep the existing one.
        tracing::debug!("tracing subscriber already set");
    }
}
