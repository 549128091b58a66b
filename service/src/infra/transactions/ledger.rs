//! In-process [`Ledger`] of transactions.

use std::{collections::HashMap, sync::Arc};

use common::operations::Insert;
use parking_lot::Mutex;
use tracerr::Traced;
use tracing as log;

use crate::domain::{session, transaction, Order};

use super::{Error, Transactions};

/// [`Transactions`] collaborator recording [`Order`]s in memory.
///
/// Repeated [`Order`]s with the same idempotency key resolve to the
/// transaction recorded first.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    /// Recorded [`Entries`].
    entries: Arc<Mutex<Entries>>,
}

/// Recorded transactions of a [`Ledger`].
#[derive(Debug, Default)]
struct Entries {
    /// [`transaction::Id`]s by idempotency keys.
    by_key: HashMap<session::Id, transaction::Id>,

    /// Recorded [`Order`]s in their arrival order.
    orders: Vec<(transaction::Id, Order)>,
}

impl Ledger {
    /// Returns all the recorded [`Order`]s along with their
    /// [`transaction::Id`]s.
    #[must_use]
    pub fn recorded(&self) -> Vec<(transaction::Id, Order)> {
        self.entries.lock().orders.clone()
    }
}

impl Transactions<Insert<Order>> for Ledger {
    type Ok = transaction::Id;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(order): Insert<Order>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut entries = self.entries.lock();

        if let Some(id) = entries.by_key.get(&order.idempotency_key) {
            log::debug!(
                "`Order(key: {})` is recorded already as `Transaction(id: {id})`",
                order.idempotency_key,
            );
            return Ok(*id);
        }

        let id = transaction::Id::new();
        _ = entries.by_key.insert(order.idempotency_key, id);
        entries.orders.push((id, order));
        Ok(id)
    }
}

#[cfg(test)]
mod spec {
    use common::operations::Insert;

    use crate::{
        domain::{
            session,
            transaction::{PaymentInfo, PaymentMethod},
            Order,
        },
        infra::Transactions as _,
    };

    use super::Ledger;

    fn order(key: session::Id) -> Order {
        Order {
            items: serde_json::from_str(
                r#"[{"productId": "p1", "quantity": 3, "price": "1.5"}]"#,
            )
            .unwrap(),
            total: "4.5".parse().unwrap(),
            payment_method: PaymentMethod::Mobile,
            payment_info: PaymentInfo::default(),
            idempotency_key: key,
        }
    }

    #[tokio::test]
    async fn records_orders() {
        let ledger = Ledger::default();

        let first = ledger.execute(Insert(order(session::Id::new()))).await;
        let second = ledger.execute(Insert(order(session::Id::new()))).await;

        assert_ne!(first.unwrap(), second.unwrap());
        assert_eq!(ledger.recorded().len(), 2);
    }

    #[tokio::test]
    async fn deduplicates_by_idempotency_key() {
        let ledger = Ledger::default();
        let key = session::Id::new();

        let first = ledger.execute(Insert(order(key))).await.unwrap();
        let again = ledger.execute(Insert(order(key))).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(ledger.recorded().len(), 1);
        assert_eq!(ledger.recorded()[0].0, first);
    }
}
