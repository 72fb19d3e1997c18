//! An async SNMP v1/v2c/v3 manager and agent library.
//!
//! Built on [`tokio`] for transport I/O. [`client::Client`] drives request/response
//! exchanges against remote agents; [`agent::Agent`] answers them, dispatching
//! GET/GETNEXT/GETBULK/SET against user-registered [`handler::MibHandler`]s under
//! optional VACM access control.
//!
//! # Manager example
//!
//! ```no_run
//! use rsnmp::prelude::*;
//! use rsnmp::transport::UdpTransport;
//! use rsnmp::client::ClientConfig;
//!
//! # async fn example() -> Result<()> {
//! let transport = UdpTransport::connect("192.0.2.1:161".parse().unwrap()).await?;
//! let client = Client::new(transport, ClientConfig::default());
//! let response = client.get(&[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! # Agent example
//!
//! ```no_run
//! # #[cfg(feature = "agent")]
//! # async fn example() -> Result<(), rsnmp::Error> {
//! use rsnmp::agent::{Agent, CommunityAccess};
//! use rsnmp::transport::UdpAgentTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! let agent = Agent::builder()
//!     .community(CommunityAccess::Read, "public")
//!     .build()?;
//! let transport = UdpAgentTransport::bind("0.0.0.0:161".parse().unwrap()).await?;
//! agent.serve(transport, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "agent")]
pub mod agent;
mod ber;
pub mod client;
pub mod error;
#[cfg(feature = "agent")]
pub mod handler;
pub mod message;
pub mod oid;
pub mod pdu;
pub mod prelude;
pub mod transport;
mod util;
pub mod v3;
pub mod value;
pub mod varbind;
pub mod version;

pub use client::Client;
pub use error::{Error, Result};
pub use oid::Oid;
pub use v3::{AuthProtocol, PrivProtocol};
pub use value::Value;
pub use varbind::VarBind;
pub use version::Version;
