//! [`Transactions`] collaborator.
//!
//! Creating a financial transaction is the only durable side effect of a
//! synchronized cart, and is delegated to an external service.

pub mod ledger;

use derive_more::{Display, Error as StdError};

pub use self::ledger::Ledger;

/// Operation of the external transactions service.
pub use common::Handler as Transactions;

/// [`Transactions`] error.
#[derive(Clone, Debug, Display, StdError)]
pub enum Error {
    /// Payment has been declined by the payment gateway.
    #[display("payment declined: {_0}")]
    Declined(#[error(not(source))] String),
}
