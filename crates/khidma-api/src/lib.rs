// khidma-api: Async Rust client for the Khidma hosted backend
// (auth service, REST data surface, websocket changefeed).

pub mod auth;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use auth::{AuthClient, Identity, Session};
pub use error::Error;
pub use realtime::{
    ChangeEvent, ChangeOp, ChangefeedClient, FeedConfig, OpSet, ReconnectConfig, StreamFilter,
    StreamSpec, Subscription, SubscriptionId,
};
pub use rest::{Filter, RestClient};
pub use transport::TransportConfig;
