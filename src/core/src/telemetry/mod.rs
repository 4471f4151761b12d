//! Telemetry: structured logging and metric names.
//!
//! Metrics go through the `metrics` facade; the embedding application decides
//! whether and where to export them.

pub mod logging;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};

/// Counter names emitted by this crate.
pub mod names {
    pub const ERRORS_TOTAL: &str = "swarmlink_errors_total";
    pub const GOSSIP_PUBLISHED_TOTAL: &str = "swarmlink_gossip_published_total";
    pub const GOSSIP_RELAYED_TOTAL: &str = "swarmlink_gossip_relayed_total";
    pub const GOSSIP_DUPLICATES_TOTAL: &str = "swarmlink_gossip_duplicates_total";
    pub const GOSSIP_SEND_FAILURES_TOTAL: &str = "swarmlink_gossip_send_failures_total";
    pub const GOSSIP_BLOCKED_TOTAL: &str = "swarmlink_gossip_blocked_total";
    pub const PUBSUB_DROPPED_TOTAL: &str = "swarmlink_pubsub_dropped_total";
    pub const TASKLIST_MERGES_TOTAL: &str = "swarmlink_tasklist_merges_total";
}
