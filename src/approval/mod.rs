//! Two-phase approval of registry mutations.
//!
//! A change is either executed immediately or proposed under a token and
//! executed later, once, by a separate invocation.

mod change;
mod gate;
mod local;
mod memory;
mod store;

pub use change::{ApprovalRecord, ApprovalToken, Change, PendingChange};
pub use gate::{default_user, AppliedChange, Approval, ApprovalGate, GateSettings};
pub use local::LocalChangeStore;
pub use memory::MemoryChangeStore;
pub use store::ChangeStore;
