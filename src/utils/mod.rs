//! The `utils` module collects the pieces shared across the crate: the fault
//! taxonomy and logging setup.

pub mod error;
pub mod logging;
