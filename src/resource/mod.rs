//! Resource distribution.
//!
//! Bundles are captured once, when an application is prepared, into a staging
//! area private to the application (copy-on-submit). Each launched instance
//! then materializes its staged bundles into its working directory before the
//! entry point runs.
//!
//! ```text
//! prepare()                               instance launch
//!    │ stage(bundle)                          │ materialize(staged, working_dir)
//!    ▼                                        ▼
//! <staging_root>/<app>/<runnable>/<name> ──► <working_dir>/<destination>
//!   (streamed copy + SHA-256)                 (verify digest, tmp + rename)
//! ```
//!
//! Archives are unpacked into a hidden sibling directory and renamed into
//! place, so an entry point never observes a partially extracted bundle.

mod archive;
mod distributor;

pub use distributor::*;
