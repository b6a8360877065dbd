//! One module per long-running thread `main` spawns.

pub mod listener;
pub mod prometheus;
