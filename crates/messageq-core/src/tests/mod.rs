//! Integration tests for the batching and flow-control engine.
//!
//! - `harness.rs`      - Scriptable mock adapter and entry helpers
//! - `batching.rs`     - Partition limits, order preservation, purity
//! - `backpressure.rs` - Bounded in-flight dispatch and permit release
//! - `lifecycle.rs`    - Readiness gating, fail-fast after stop, startup failure
//! - `flush.rs`        - Idle flush and shutdown flush/drain
//! - `ordering.rs`     - Per-caller order across batch boundaries

mod flush;
mod lifecycle;
