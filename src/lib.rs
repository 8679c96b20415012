//! d-fleet: an orchestration engine for distributed applications.
//!
//! An application is a set of runnables (roles), each launched as one or
//! more instances on a cluster backend. The engine ships local files and
//! archives to every instance before its entry point runs, tracks which
//! instances are live and reachable through a discovery registry, and drives
//! every instance through its lifecycle until the application is terminated.
//!
//! ```ignore
//! let (driver, backend) = ApplicationDriver::local(FleetConfig::new()?.validate()?);
//! backend.register_runnable("echo-server", Arc::new(EchoServer));
//!
//! let controller = driver
//!     .prepare(
//!         ApplicationSpec::builder("echo")
//!             .runnable(RunnableSpec::builder("server", "echo-server").build())
//!             .any_order(),
//!     )
//!     .await?;
//! let mut watch = controller.discover_service("echo")?;
//! watch.wait_for_size(1, Duration::from_secs(60)).await?;
//! controller.terminate().await?;
//! ```

mod cluster;
mod config;
mod constants;
mod controller;
mod discovery;
mod errors;
mod instance;
mod log_handler;
mod resource;
mod spec;
pub(crate) mod utils;

pub use cluster::*;
pub use config::*;
pub use controller::*;
pub use discovery::*;
pub use errors::*;
pub use instance::*;
pub use log_handler::LogEntry;
pub use log_handler::LogHandler;
pub use log_handler::LogLevel;
pub use log_handler::CollectingLogHandler;
pub use log_handler::TracingLogHandler;
pub use resource::*;
pub use spec::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
