//! [`Command`] for paying a [`Session`].

use common::{
    operations::{By, Insert, Lock, Select, Update},
    Money,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, Identifier, Outcome, Settlement, Status, Transitioned},
        transaction::{self, PaymentInfo, PaymentMethod},
        Order, Session,
    },
    infra::{database, transactions, Database, Transactions},
    Service,
};

use super::Command;

/// [`Command`] for paying a [`Status::Pending`] [`Session`] from a mobile
/// client.
///
/// A single [`Session`] is never charged twice: concurrent attempts are
/// refused while a payment is in flight, and a settled [`Session`] is not
/// [`Status::Pending`] anymore.
#[derive(Clone, Debug)]
pub struct ProcessPayment {
    /// [`Identifier`] of the [`Session`] to pay.
    pub identifier: Identifier,

    /// [`PaymentInfo`] provided by the payer.
    pub payment: PaymentInfo,
}

impl<Db, Tx, C> Command<ProcessPayment> for Service<Db, Tx>
where
    Db: Database<
            Select<By<Option<Session>, Identifier>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        > + Database<
            Lock<By<Session, session::Id>>,
            Ok = Option<C>,
            Err = Traced<database::Error>,
        > + Database<
            Update<Settlement>,
            Ok = Transitioned,
            Err = Traced<database::Error>,
        >,
    Tx: Transactions<
        Insert<Order>,
        Ok = transaction::Id,
        Err = Traced<transactions::Error>,
    >,
{
    type Ok = transaction::Id;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: ProcessPayment,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ProcessPayment {
            identifier,
            payment,
        } = cmd;

        let session = self
            .database()
            .execute(Select(By::new(identifier.clone())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::SessionNotExists(identifier.clone()))
            .map_err(tracerr::wrap!())?;

        if !session.is_pending() {
            return Err(tracerr::new!(E::InvalidState(session.status)));
        }
        // Expiration may lag behind its deadline.
        if session.is_overdue() {
            return Err(tracerr::new!(E::InvalidState(Status::Expired)));
        }
        if let Some(amount) = payment.amount {
            if amount != session.total {
                return Err(tracerr::new!(E::AmountMismatch {
                    expected: session.total,
                    amount,
                }));
            }
        }

        // Released on drop, whatever happens below.
        let Some(claim) = self
            .database()
            .execute(Lock(By::new(session.id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            let current = self
                .database()
                .execute(Select(By::new(session.id.into())))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Err(tracerr::new!(match current {
                Some(s) if !s.is_pending() => E::InvalidState(s.status),
                Some(_) => E::PaymentInProgress,
                None => E::SessionNotExists(identifier),
            }));
        };

        let created = self
            .transactions()
            .execute(Insert(Order {
                items: session.items,
                total: session.total,
                payment_method: PaymentMethod::Mobile,
                payment_info: payment,
                idempotency_key: session.id,
            }))
            .await;
        let outcome = match &created {
            Ok(id) => Outcome::Paid(*id),
            Err(e) => Outcome::Failed(e.as_ref().to_string().into()),
        };

        let settled = self
            .database()
            .execute(Update(Settlement {
                session_id: session.id,
                outcome,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        drop(claim);

        match &settled {
            Transitioned::Applied(s) => {
                log::info!(
                    "`Session(id: {})` payment is settled as `{}`",
                    s.id,
                    s.status,
                );
            }
            Transitioned::Rejected(_)
            | Transitioned::Busy
            | Transitioned::Missing => {
                log::warn!(
                    "`Session(id: {})` payment outcome is not recorded: \
                     {settled}",
                    session.id,
                );
            }
        }

        created.map_err(tracerr::map_from_and_wrap!(=> E))
    }
}

/// Error of [`ProcessPayment`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// Provided amount doesn't match the [`Session`] total.
    #[display("amount `{amount}` doesn't match the cart total `{expected}`")]
    AmountMismatch {
        /// Total of the [`Session`].
        expected: Money,

        /// Amount provided by the payer.
        amount: Money,
    },

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    #[from]
    Db(database::Error),

    /// [`Session`] is not [`Status::Pending`] anymore.
    #[display("`Session` is already `{_0}`")]
    InvalidState(#[error(not(source))] Status),

    /// [`Transactions`] collaborator has failed to create a transaction, so
    /// the [`Session`] is [`Status::Failed`] now.
    #[display("payment failed: {_0}")]
    #[from]
    PaymentFailed(transactions::Error),

    /// [`Session`] is being paid at the moment.
    #[display("`Session` payment is in progress")]
    PaymentInProgress,

    /// [`Session`] with the provided [`Identifier`] does not exist.
    #[display("`Session({_0})` does not exist")]
    SessionNotExists(#[error(not(source))] Identifier),
}

#[cfg(test)]
mod spec {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use common::operations::{By, Insert, Select};
    use tracerr::Traced;

    use crate::{
        domain::{
            session::{Identifier, Status},
            transaction::{self, PaymentInfo},
            Order, Session,
        },
        infra::{transactions, Database as _, Ledger, Memory, Transactions},
        Command as _, Config, Service,
    };

    use super::{ExecutionError, ProcessPayment};

    /// [`Transactions`] declining every [`Order`].
    #[derive(Clone, Debug, Default)]
    struct Declining {
        calls: Arc<AtomicUsize>,
    }

    impl Transactions<Insert<Order>> for Declining {
        type Ok = transaction::Id;
        type Err = Traced<transactions::Error>;

        async fn execute(
            &self,
            _: Insert<Order>,
        ) -> Result<Self::Ok, Self::Err> {
            _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Err(tracerr::new!(transactions::Error::Declined(
                "insufficient funds".into(),
            )))
        }
    }

    /// [`Ledger`] answering after a delay.
    #[derive(Clone, Debug, Default)]
    struct Slow(Ledger);

    impl Transactions<Insert<Order>> for Slow {
        type Ok = transaction::Id;
        type Err = Traced<transactions::Error>;

        async fn execute(
            &self,
            op: Insert<Order>,
        ) -> Result<Self::Ok, Self::Err> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.0.execute(op).await
        }
    }

    async fn service<Tx>(tx: Tx) -> (Service<Memory, Tx>, Session)
    where
        Service<Memory, Tx>: Clone + 'static,
        Tx: Clone + 'static,
    {
        let svc = Service::new(Config::default(), Memory::default(), tx).0;
        let s = Session::new(
            serde_json::from_str(r#"[{"productId": "p1", "qty": 2, "price": 10}]"#)
                .unwrap(),
            "20".parse().unwrap(),
            svc.config().sessions.payable_for,
        );
        _ = svc.database().execute(Insert(s.clone())).await.unwrap();
        (svc, s)
    }

    async fn select<Tx>(svc: &Service<Memory, Tx>, s: &Session) -> Session {
        svc.database()
            .execute(Select(By::<Option<Session>, Identifier>::new(s.id.into())))
            .await
            .unwrap()
            .unwrap()
    }

    fn pay(by: impl Into<Identifier>) -> ProcessPayment {
        ProcessPayment {
            identifier: by.into(),
            payment: PaymentInfo {
                user_id: transaction::UserId::new("u1"),
                amount: Some("20".parse().unwrap()),
            },
        }
    }

    #[tokio::test]
    async fn pays_exactly_once() {
        let ledger = Ledger::default();
        let (svc, s) = service(ledger.clone()).await;

        let tx_id = svc.execute(pay(s.short_code.clone())).await.unwrap();

        let paid = select(&svc, &s).await;
        assert_eq!(paid.status, Status::Paid);
        assert_eq!(paid.transaction_id, Some(tx_id));
        assert!(paid.error_reason.is_none());

        let err = svc.execute(pay(s.id)).await.unwrap_err();
        assert!(matches!(
            err.as_ref(),
            ExecutionError::InvalidState(Status::Paid),
        ));
        assert_eq!(err.as_ref().to_string(), "`Session` is already `paid`");

        let recorded = ledger.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, tx_id);
        assert_eq!(recorded[0].1.idempotency_key, s.id);
        assert_eq!(recorded[0].1.total, s.total);
    }

    #[tokio::test]
    async fn marks_session_failed_on_declined_payment() {
        let declining = Declining::default();
        let (svc, s) = service(declining.clone()).await;

        let err = svc.execute(pay(s.id)).await.unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::PaymentFailed(_)));

        let failed = select(&svc, &s).await;
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.transaction_id.is_none());
        assert_eq!(
            failed.error_reason.unwrap().to_string(),
            "payment declined: insufficient funds",
        );

        let err = svc.execute(pay(s.id)).await.unwrap_err();
        assert!(matches!(
            err.as_ref(),
            ExecutionError::InvalidState(Status::Failed),
        ));
        assert_eq!(declining.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_concurrent_payment() {
        let slow = Slow::default();
        let (svc, s) = service(slow.clone()).await;

        let (first, second) =
            tokio::join!(svc.execute(pay(s.id)), svc.execute(pay(s.id)));

        let tx_id = first.unwrap();
        assert!(matches!(
            second.unwrap_err().as_ref(),
            ExecutionError::PaymentInProgress,
        ));
        assert_eq!(select(&svc, &s).await.transaction_id, Some(tx_id));
        assert_eq!(slow.0.recorded().len(), 1);
    }

    #[tokio::test]
    async fn rejects_mismatched_amount() {
        let ledger = Ledger::default();
        let (svc, s) = service(ledger.clone()).await;

        let err = svc
            .execute(ProcessPayment {
                payment: PaymentInfo {
                    user_id: None,
                    amount: Some("19.99".parse().unwrap()),
                },
                ..pay(s.id)
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::AmountMismatch { .. }));
        assert_eq!(select(&svc, &s).await.status, Status::Pending);
        assert!(ledger.recorded().is_empty());
    }

    #[tokio::test]
    async fn reports_unknown_session() {
        let (svc, _) = service(Ledger::default()).await;

        let err = svc
            .execute(pay("ZZZZZZ".parse::<Identifier>().unwrap()))
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::SessionNotExists(_)));
    }

    #[tokio::test]
    async fn rejects_overdue_session() {
        let ledger = Ledger::default();
        let (svc, _) = service(ledger.clone()).await;
        let overdue = Session::new(
            serde_json::from_str(r#"[{"productId": "p1", "qty": 2, "price": 10}]"#)
                .unwrap(),
            "20".parse().unwrap(),
            Duration::ZERO,
        );
        _ = svc.database().execute(Insert(overdue.clone())).await.unwrap();

        let err = svc.execute(pay(overdue.id)).await.unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::InvalidState(Status::Expired),
        ));
        assert_eq!(select(&svc, &overdue).await.status, Status::Pending);
        assert!(ledger.recorded().is_empty());
    }
}
