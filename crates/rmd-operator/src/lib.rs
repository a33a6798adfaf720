//! Keeps per-node RMD daemons in line with `RmdWorkload` resources and
//! mirrors what the daemons report into `RmdNodeState` resources.

pub mod config;
pub mod consts;
pub mod controllers;
pub mod daemon;
pub mod deriver;
pub mod error;
pub mod introspection;
pub mod k8s;
pub mod logging;
pub mod registry;
pub mod reporter;
pub mod synchronizer;

#[cfg(test)]
mod testing;
