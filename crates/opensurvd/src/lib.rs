//! OpenSurv manager daemon
//!
//! Serves the update API and, as `apply-update`, installs a staged update.

pub mod apply;
pub mod cli;
pub mod config;
pub mod routes;
pub mod server;
