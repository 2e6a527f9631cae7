//! relaypool: Dispatch HTTP requests to an elastic pool of provisioned
//! workers.
//!
//! A [`Session`] keeps one pool of workers per mount URL. Requests
//! submitted through an [`Ingress`] wait in a shared dispatch queue
//! until a live worker picks them up over one of two transports, a
//! socket tunnel or a provider-mediated file exchange. Pools grow and
//! shrink to follow queue pressure and replace workers that die without
//! losing the requests they were carrying.

// Core modules
pub mod channel;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ingress;
pub mod pool;
pub mod provider;
pub mod queue;
pub mod session;
pub mod sizing;

mod supervisor;

// Re-export commonly used types
pub use envelope::{Request, Response};
pub use error::{ChannelError, ProvisionError, QueueError, SessionError, WireError};
pub use ingress::Ingress;
pub use pool::{Pool, PoolConfig, PoolStats};
pub use session::Session;
