//! Spool Core - Shared vocabulary for connection pooling
//!
//! This crate defines the destination keys, handle identities, the
//! connection factory collaborator and the error taxonomy shared by every
//! pool, independent of any wire protocol.

mod destination;
mod error;
mod factory;
mod policy;

pub use destination::{Destination, HandleId, PoolId};
pub use error::{ConnectError, PoolError, PoolErrorKind, Result};
pub use factory::ConnectionFactory;
pub use policy::OverflowPolicy;
