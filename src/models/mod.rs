//! Domain models for identities, peers and messages

mod message;
mod user;

pub use message::*;
pub use user::*;
