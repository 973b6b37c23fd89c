//! Core types shared by every layer: constants, errors, identities and the
//! collaborator interfaces implemented by the host.

mod constants;
pub(crate) mod duration_ms;
mod error;
mod identity;
mod traits;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use traits::*;
