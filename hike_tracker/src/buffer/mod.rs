pub mod pending;

pub use pending::{PendingClaim, PendingId, PendingSessions, ResubmitSummary};
