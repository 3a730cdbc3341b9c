//! # iplchat-client
//!
//! The client's side of the protocol: a framed connection to the broker,
//! the per-client notification listener, a typed event interface any
//! front-end can subscribe to, and the two-phase peer key exchange driver
//! composed with the persistent keychain.
//!
//! The original program wired its chat client directly into a desktop
//! form toolkit; this crate has no UI dependency at all — a front-end
//! owns a [`connection::Connection`], an [`iplchat_keychain::Keychain`],
//! and an [`events::EventBus`], and wires the three together however it
//! likes.

pub mod connection;
pub mod error;
pub mod events;
pub mod keyexchange;
pub mod listener;
