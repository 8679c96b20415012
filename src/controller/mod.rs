//! Application control.
//!
//! `ApplicationDriver::prepare` validates and stages an application, then
//! spawns one supervisor task that owns every instance record of it. The
//! returned `ApplicationController` talks to the supervisor over a command
//! channel and observes it through a `watch` of `ApplicationStatus`.
//!
//! ```text
//! ApplicationController ──Terminate──► Supervisor ◄── InstanceReport (mpsc)
//!          ▲                            │   ▲
//!          └──── ApplicationStatus ─────┘   └── expirations (registry broadcast)
//!                   (watch)
//! ```

mod controller;
mod driver;
mod plan;
mod status;
mod supervisor;

pub use controller::*;
pub use driver::*;
pub use plan::*;
pub use status::*;

#[cfg(test)]
mod controller_test;
