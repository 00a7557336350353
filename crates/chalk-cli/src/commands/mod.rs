pub mod auth_cmd;
pub mod common;
pub mod invite;
pub mod link;
pub mod queue;
pub mod sync;
