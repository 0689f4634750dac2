//! CLI commands.

pub mod info;
pub mod pull;
pub mod serve;
pub mod smoke;
