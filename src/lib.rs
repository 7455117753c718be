//! kiln: command entry and dev-process supervision for a front-end build tool.
//!
//! `kiln dev` runs under a supervisor: the parent process spawns a worker,
//! relays termination signals to it and exits, while the worker runs the dev
//! command and fires the `onExit` hooks exactly once. Every other command runs
//! in-process through the same [`runner::Runner`] boundary.

pub mod command;
pub mod config;
pub mod hooks;
pub mod invoker;
pub mod preflight;
pub mod process;
pub mod runner;
pub mod signals;
pub mod supervisor;
pub mod worker;
