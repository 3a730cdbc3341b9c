//! Core domain models shared across broker, client, and persistence layers.
//!
//! These are the "truth" types — what the database stores and the wire
//! protocol serializes. Identity uses UUIDs: every user and every channel
//! carries an opaque 36-character identifier.

pub mod channel;
pub mod keychain_entry;
pub mod message;
pub mod session;
pub mod user;

pub use channel::*;
pub use keychain_entry::*;
pub use message::*;
pub use session::*;
pub use user::*;
