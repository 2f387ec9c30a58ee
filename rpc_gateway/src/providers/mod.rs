//! Endpoint management for the RPC gateway
//!
//! Registry, selection, sessions, retry and failover for a pool of
//! JSON-RPC endpoints.

pub mod registry;
pub mod selector;
pub mod session;
pub mod retry;
pub mod failover;
pub mod multi_rpc;

// Re-export commonly used types
pub use registry::{EndpointDescriptor, EndpointRegistry, EndpointSnapshot, EndpointStatus};
pub use selector::{select_endpoint, ActiveSelection};
pub use session::{Connector, HttpConnector, SessionPool};
pub use retry::{retry, BackoffPolicy, BackoffStrategy, RetryPolicy};
pub use failover::{ResilientExecutor, SelectionCache};
pub use multi_rpc::MultiRpcClient;
