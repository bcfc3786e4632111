//! Meta-package re-exporting all libraries of the strata world engine.

pub use strata_core;
pub use strata_server;
