pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod router;
pub mod server;
pub mod stats;

pub use backend::{GenerationBackend, GenerationClient};
pub use cache::ResponseCache;
pub use config::BridgeConfig;
pub use error::{BackendError, BridgeError, RelayError};
pub use model::{GenerationRequest, GenerationResponse};
pub use queue::RequestQueue;
pub use relay::{ReconnectPolicy, RelayLink, RelayState, WebSocketConnector};
pub use router::RequestRouter;
pub use server::build_router;
pub use stats::{BridgeStats, StatsReporter};
