//! Trust boundary between the untrusted page and the privileged context.
//!
//! The page talks to the [`Relay`], the relay talks to the
//! [`PrivilegedService`]. Only signatures and public data come back.

pub mod protocol;
pub mod relay;
pub mod session;

pub use protocol::{AccountSummary, ErrorCode, PrivilegedRequest, PrivilegedResponse};
pub use relay::{port_pair, Port, Relay, RelayState, WindowMessage};
pub use session::{PrivilegedHandle, PrivilegedService, SessionToken};
