//! Client layer.
//!
//! [`IdentityRegistry`] owns everything kept per server identity: the secure
//! connection (with its request multiplexer), the event stream and the
//! persisted cursor. Identities never share any of it, and
//! [`IdentityRegistry::reset_for_identity`] tears all of it down together.

mod error;
mod registry;

pub use error::{ClientError, ClientResult};
pub use registry::IdentityRegistry;
