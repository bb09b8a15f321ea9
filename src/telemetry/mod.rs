// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging with `tracing`; the server variant
//!   writes to stderr so the stdio transport keeps stdout to itself.
//! - **Metrics**: operation timings and named counters collected in a
//!   process-global registry, gated behind the `telemetry` feature.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
