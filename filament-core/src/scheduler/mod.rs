//! Update scheduling.
//!
//! Requests for document writes are expressed as [`ChangeSet`]s, held as
//! [`UpdateTask`]s until the next frame, and applied by the
//! [`UpdateScheduler`] in priority order.

mod change_set;
mod task;
mod update;

pub use change_set::ChangeSet;
pub use task::{Priority, UpdateTask};
pub use update::{HandlerId, UpdateHandler, UpdateScheduler};
