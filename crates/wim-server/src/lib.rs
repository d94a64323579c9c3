//! Command-line front end for the web inventory: configuration, logging,
//! the live probe source and the job entry points.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod seed;
