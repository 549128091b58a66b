//! Financial transaction definitions.
//!
//! Transactions themselves are owned by an external [`Transactions`]
//! collaborator, only the data exchanged with it is defined here.
//!
//! [`Transactions`]: crate::infra::Transactions

use std::str::FromStr;

use common::{define_kind, Money};
use derive_more::{AsRef, Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::{self, LineItem};

/// ID of a financial transaction.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Into,
    PartialEq,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s.trim())
            .map(Self)
            .map_err(|_| "invalid `transaction::Id`")
    }
}

/// Order to be turned into a financial transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Order {
    /// Paid [`LineItem`]s.
    pub items: Vec<LineItem>,

    /// Total amount to be charged.
    pub total: Money,

    /// [`PaymentMethod`] used by the payer.
    pub payment_method: PaymentMethod,

    /// [`PaymentInfo`] provided by the payer.
    pub payment_info: PaymentInfo,

    /// Key deduplicating repeated submissions of the same [`Order`].
    ///
    /// Synchronized carts use their [`session::Id`], so a single cart never
    /// produces two transactions.
    pub idempotency_key: session::Id,
}

/// Payer-provided payment details.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PaymentInfo {
    /// [`UserId`] of the payer, if known.
    pub user_id: Option<UserId>,

    /// Amount the payer has agreed to pay, if provided.
    pub amount: Option<Money>,
}

/// Reference to a payer account.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(forward)]
pub struct UserId(String);

impl UserId {
    /// Creates a new [`UserId`] if the given `id` is valid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.trim().is_empty() && id.len() <= 128).then_some(Self(id))
    }
}

define_kind! {
    #[doc = "Method a transaction is paid with."]
    enum PaymentMethod {
        #[doc = "Payment from a mobile client continuing a synced cart."]
        Mobile = 1,
    }
}
