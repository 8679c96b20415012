//! the test_utils folder here will share utils and fixtures between unit
//! tests of different modules
mod common;
mod runnables;

pub use common::*;
pub use runnables::*;
