//! Index synchronization / 索引同步
//!
//! - [`IndexMutationGateway`]: the single removal path into an index
//! - [`CultureDiffResolver`]: existing vs desired cultures of one item
//! - [`ContentChangeIndexSynchronizer`]: applies ordered change records
//! - [`ProtectedContentIndexSweeper`]: removes protected content after access changes
//! - [`IndexNotificationHandler`]: turns notifications into deferred actions

pub mod content_changes;
pub mod culture_diff;
pub mod gateway;
pub mod notifications;
pub mod protected_sweep;

pub use content_changes::{ContentChangeIndexSynchronizer, SyncReport};
pub use culture_diff::{CultureDiff, CultureDiffResolver};
pub use gateway::IndexMutationGateway;
pub use notifications::{ChangeScope, IndexNotificationHandler, ReindexContent, SweepProtectedContent, SyncContentChanges};
pub use protected_sweep::{ProtectedContentIndexSweeper, SweepReport};
