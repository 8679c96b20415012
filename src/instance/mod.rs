//! Runnable instances: lifecycle states, the records the supervisor keeps,
//! the reports instances send, and the runtime that drives an entry point.
//!
//! ```text
//! Pending ─► Starting ─► Running ─► Stopping ─► Stopped
//!    │          │           │          │
//!    └──────────┴───────────┴──────────┴──► Failed
//! ```

mod context;
mod record;
mod report;
mod runtime;
mod state;

pub use context::*;
pub use record::*;
pub use report::*;
pub(crate) use runtime::*;
pub use state::*;
