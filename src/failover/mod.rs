// Multi-endpoint failover for outbound RPC/API calls
pub mod endpoint;
pub mod router;

pub use crate::circuit::CircuitState;
pub use endpoint::{Endpoint, EndpointHealth};
pub use router::FailoverRouter;
