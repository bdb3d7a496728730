//! fleetops-api: Shared wire types
//!
//! Request/response payloads of the directory service API and the progress
//! events emitted during a deploy. Used by the client, the core and the CLI.

pub mod events;
pub mod requests;
pub mod responses;
