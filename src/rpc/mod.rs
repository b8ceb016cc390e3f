// JSON-RPC calls routed through the failover pool
pub mod client;

pub use client::RpcClient;
