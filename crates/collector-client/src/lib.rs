//! Collector wire protocol.
//!
//! The agent talks to the remote collector with two operations:
//!
//! - `ping` while idle, to learn whether anyone is watching
//! - `post` while collecting, to submit one or more monitoring samples
//!
//! Both are plain HTTP POSTs with JSON bodies. The collector answers through
//! response headers (subscription state, configuration ETag, polling hint,
//! endpoint redirect) and, when the configuration changed, a JSON body.
//!
//! # Examples
//!
//! ```no_run
//! # use collector_client::{BlockingServiceClient, ClientConfig, CommError, ServiceClient};
//! # fn main() -> Result<(), error_stack::Report<CommError>> {
//! let config = ClientConfig::with_default_endpoint()?.with_role_name("checkout");
//! let client = BlockingServiceClient::new(config)?;
//! let response = client.ping("my-ikey", chrono::Utc::now(), "", None)?;
//! println!("subscribed: {:?}", response.subscribed);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod types;

pub use client::BlockingServiceClient;
pub use client::ServiceClient;
pub use config::ClientConfig;
pub use config::DEFAULT_ENDPOINT;
pub use error::CommError;
pub use error::CommResult;
pub use types::CollectorResponse;
pub use types::PollingHint;
