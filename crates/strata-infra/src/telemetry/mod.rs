//! Tracing initialization
//!
//! `RUST_LOG` selects the filter (default `strata=debug,tower_http=debug`);
//! `LOG_FORMAT=json` switches to one JSON object per line for log shippers.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry, LogFormat};
