//! An IRC bot built on `sable_bot`: built-in plugins and the process entry point.

pub mod plugins;
pub mod run;
