//! Token record, provider response, and secret wrapper types.

pub mod record;
pub mod response;
pub mod secret;
