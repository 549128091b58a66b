//! Infrastructure layer.

pub mod database;
pub mod transactions;

pub use self::{
    database::{Database, Memory},
    transactions::{Ledger, Transactions},
};
