//! Protocol constants from the external-interfaces contract. These are fixed
//! behavior, not configuration — only the bind port and log level are
//! CLI/env tunable (see `main::Opts`).

/// Maximum concurrent producer connections.
pub const MAX_PRODUCERS: usize = 25;

/// Silence after which the active sender is demoted.
pub const SENDER_INACTIVITY_TIMEOUT_MS: u64 = 30_000;

/// A disconnect-then-reconnect faster than this is "continuity" for logging
/// purposes only; it does not by itself gate promotion (see DESIGN.md).
pub const RECONNECT_WINDOW_MS: u64 = 300_000;

/// A former active sender reconnecting within this window may hot-reclaim
/// the sender role.
pub const RECONNECT_PROMOTION_WINDOW_MS: u64 = 60_000;

/// Silence above which a hot-reconnecting former sender may preempt the
/// incumbent active sender.
pub const RECLAIM_IDLE_THRESHOLD_MS: u64 = 10_000;

/// Bulk batch flush interval.
pub const BATCH_INTERVAL_MS: u64 = 1_000;

/// Bulk batch size trigger / maximum batch size.
pub const MAX_BATCH_SIZE: usize = 10;

/// Cadence of the periodic status log and the per-minute rate-reset tick.
/// Independent tickers (see DESIGN.md's resolution of the two-60s-wakes question).
pub const STATUS_LOG_INTERVAL_MS: u64 = 60_000;
pub const RATE_RESET_INTERVAL_MS: u64 = 60_000;
