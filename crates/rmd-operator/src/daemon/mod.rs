//! Typed REST access to the per-node RMD daemon.
//!
//! The main components are:
//! - [`DaemonApi`]: the operations every engine drives against a daemon instance
//! - [`DaemonClient`]: the `reqwest` implementation, plaintext or mutual TLS
//! - [`DaemonError`]: failures whose display text doubles as the status summary

mod client;
mod tls;

use core::error::Error;

use api_types::DaemonWorkload;
use api_types::L3CacheInfo;
use async_trait::async_trait;
use error_stack::Report;

pub use client::DaemonClient;
pub use tls::TlsPaths;

pub type DaemonResult<T> = Result<T, Report<DaemonError>>;

/// Errors returned by daemon calls.
///
/// The display text of the outermost context is persisted into workload
/// status, so the wording is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DaemonError {
    #[display("failed to create request")]
    CreateRequest,
    #[display("failed to set header")]
    SetHeader,
    #[display("failed to reach daemon at {address}")]
    Transport { address: String },
    #[display("Fail: {status} {body}")]
    Rejected { status: u16, body: String },
    #[display("failed to decode daemon response")]
    Decode,
    #[display("failed to set up TLS: {message}")]
    Tls { message: String },
    #[display("failed to build HTTP client")]
    Client,
}

impl Error for DaemonError {}

/// Textual summary of a failed call, as recorded in workload status.
pub fn failure_summary(report: &Report<DaemonError>) -> String {
    report.current_context().to_string()
}

/// Operations against one daemon instance.
///
/// `address` is the base URL of the instance (`<prefix><host>:<port>`); it is
/// supplied per call so one client serves every node.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// `"http://"` or `"https://"`, fixed at construction.
    fn address_prefix(&self) -> &'static str;

    async fn get_workloads(&self, address: &str) -> DaemonResult<Vec<DaemonWorkload>>;

    /// Creates an entry. Returns the success summary.
    async fn create_workload(&self, address: &str, workload: &DaemonWorkload)
        -> DaemonResult<String>;

    /// Updates the entry with daemon id `id`. Returns the success summary.
    async fn update_workload(
        &self,
        address: &str,
        id: &str,
        workload: &DaemonWorkload,
    ) -> DaemonResult<String>;

    async fn delete_workload(&self, address: &str, id: &str) -> DaemonResult<()>;

    async fn get_l3_cache(&self, address: &str) -> DaemonResult<L3CacheInfo>;
}

/// Joins the client's scheme with a `host:port` address.
pub fn daemon_base_url(daemon: &dyn DaemonApi, host_port: &str) -> String {
    format!("{}{host_port}", daemon.address_prefix())
}

/// Finds the entry whose external identifier is `uuid`.
pub fn find_by_uuid<'a>(entries: &'a [DaemonWorkload], uuid: &str) -> Option<&'a DaemonWorkload> {
    entries.iter().find(|entry| entry.uuid == uuid)
}
