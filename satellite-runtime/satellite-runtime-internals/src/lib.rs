//! `satellite-runtime` hosts a managed runtime (a Java virtual machine reachable through its
//! native embedding API) inside a long-lived native process, and drives the small lifecycle
//! protocol an external supervisor expects from a daemon.

#![deny(bare_trait_objects)]

#[macro_use]
pub mod error;

#[macro_use]
#[cfg(test)]
pub mod test_helpers;

pub mod attach;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod control;
pub mod embedding;
pub mod fault;
pub mod hooks;
pub mod library;
pub mod options;
pub mod redirect;
pub mod teardown;
pub mod vm;
