//! Static provider configuration: client identity, scope, and the three remote endpoints
//! (authorization page, accounting API, trusted intermediary).

pub mod descriptor;

pub use descriptor::*;
