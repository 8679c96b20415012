//! Declarative description of a distributed application.
//!
//! An [`ApplicationSpec`] groups [`RunnableSpec`]s under a [`Placement`] that
//! decides launch ordering. Each runnable carries the [`ResourceBundle`]s that
//! must be present in its working directory before the entry point runs.

mod application;
mod bundle;
mod runnable;

pub use application::*;
pub use bundle::*;
pub use runnable::*;
