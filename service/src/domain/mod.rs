//! Domain definitions.

pub mod session;
pub mod transaction;

pub use self::{session::Session, transaction::Order};
