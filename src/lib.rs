// TODO add a store implementation that talks to a real server, so the scenario can run outside of
// tests and the in-memory runner
#![deny(clippy::all, clippy::pedantic, clippy::nursery, warnings)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// this one appears to suggest invalid changes
#![allow(clippy::significant_drop_tightening)]

pub mod checks;
mod checksum;
pub mod config;
pub mod runner;
pub mod scenario;
pub mod store;
pub mod touch_log;
