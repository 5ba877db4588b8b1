//! Constants for remote HTTP calls (timeouts, endpoint paths).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle read timeout between body chunks (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Total timeout for one listing or removal call.
pub const API_CALL_TIMEOUT_SECS: u64 = 60;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("harvester/", env!("CARGO_PKG_VERSION"));

/// Listing endpoint path segments under the API base.
pub(crate) const LIST_ENDPOINT: [&str; 3] = ["api", "fs", "list"];

/// Removal endpoint path segments under the API base.
pub(crate) const REMOVE_ENDPOINT: [&str; 3] = ["api", "fs", "remove"];
