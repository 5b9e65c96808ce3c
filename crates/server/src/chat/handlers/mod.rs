//! Chat REST handlers

pub mod friends;
pub mod messages;
pub mod users;
