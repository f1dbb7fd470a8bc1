// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side OPC UA over `opc.tcp`.
//!
//! The crate is layered bottom-up:
//!
//! ```text
//! Session ──────────── session services, continuation loops, lifecycle
//!   ├── Subscriptions  publish loop and notification routing
//!   └── SecureChannel  chunking, signing/encryption, request correlation
//!         ├── security policies, certificates, PKI store
//!         └── codec    OPC UA Binary encoding of builtins and messages
//! ```
//!
//! # Error Handling
//!
//! Every fallible call returns [`UaResult`]:
//!
//! ```text
//! UaError
//! ├── Handshake       - Connect, HEL/ACK and OpenSecureChannel failures
//! ├── ChannelAborted  - The channel died; every pending request fails with it
//! ├── SessionInvalid  - The server no longer accepts the session
//! ├── ServiceFault    - A service call was rejected
//! ├── Codec           - Malformed or oversized data
//! ├── Security        - Certificates, keys and signatures
//! ├── Session         - Local misuse of the session API
//! ├── Timeout         - No response in time
//! └── Configuration   - Invalid settings
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ua_client::{ClientConfig, Session};
//! use ua_client::types::NodeId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("opc.tcp://localhost:4840");
//!     let session = Session::from_config(config).await?;
//!     session.open().await?;
//!
//!     let value = session.read_value(NodeId::numeric(0, 2258)).await?;
//!     println!("Server time: {:?}", value);
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod security;
pub mod session;
pub mod subscription;
pub mod types;

pub use config::{
    ClientConfig, ClientConfigBuilder, IdentityConfig, PublishSettings, SubscriptionSettings,
};
pub use error::{
    ChannelAbortedError, CodecError, ConfigurationError, HandshakeError, SecurityError,
    ServiceFault, SessionError, SessionInvalidError, TimeoutError, UaError, UaResult,
};

pub use channel::{ChannelOptions, ChannelState, SecureChannel};
pub use security::{SecurityMode, SecurityPolicy};
pub use session::{
    BrowseOutcome, EndpointSelection, Session, SessionInfo, SessionState, UserIdentity,
};
pub use subscription::{
    BaseEvent, BroadcastCallback, ChannelCallback, DataChange, EventFields, Notification,
    SubscriptionCallback, SubscriptionInfo,
};
