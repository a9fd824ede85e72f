// ── Reactive telemetry store ──
//
// Bounded packet history, metrics and rule sets with push-based change
// notification.

mod aggregation;
pub(crate) mod keyed;
mod rule_set;
mod telemetry_store;

pub use aggregation::{ProtocolAggregation, ProtocolStats};
pub use rule_set::{PendingEntry, PendingWrite, RefreshTicket, RuleSet};
pub use telemetry_store::{LinkStatus, TelemetrySnapshot, TelemetryStore};
