pub mod aggregator;
pub mod arbiter;
pub mod batcher;
pub mod constants;
pub mod ledger;
pub mod registry;
pub mod router;
pub mod stats;
pub mod types;
