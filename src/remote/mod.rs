//! Client for the remote file-tree service.
//!
//! The service exposes a paginated directory listing and an entry removal
//! call behind a bearer token. File bodies are served separately by the
//! download host (see [`crate::download`]).
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::remote::{RemoteClient, RemoteTree};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RemoteClient::new(Url::parse("http://127.0.0.1:5244")?, "token")?;
//! let page = client.list("/", 1, 100).await?;
//! println!("{} entries, more: {}", page.entries.len(), page.has_more);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{RemoteClient, build_http_client};
pub(crate) use client::{check_status, join_segments, send_error};
pub use error::RemoteError;
pub use types::{ListPage, RemoteEntry, RemoveRequest};

/// Operations the pipeline needs from the remote tree.
///
/// Implemented by [`RemoteClient`]; tests substitute in-memory trees.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Lists one page (1-indexed) of `directory`.
    async fn list(&self, directory: &str, page: u32, page_size: u32)
    -> Result<ListPage, RemoteError>;

    /// Removes the entry `name` from `directory`.
    async fn remove(&self, directory: &str, name: &str) -> Result<(), RemoteError>;
}
