//! Repository layer — query functions organized by domain, one module per
//! table family in the schema.

pub mod channels;
pub mod messages;
pub mod subscriptions;
pub mod users;
