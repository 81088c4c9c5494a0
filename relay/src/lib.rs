//! Library surface for the sensor telemetry relay, split out from `main.rs`
//! so integration tests can spin up the real `warp` server in-process rather
//! than shelling out to the compiled binary.

pub mod core;
pub mod messages;
pub mod metrics;
pub mod server;
