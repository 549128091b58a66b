//! [`Command`] for creating a new [`Session`].

use common::{operations::Insert, Money};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, LineItem, ShortCode},
        Session,
    },
    infra::{database, Database},
    Service,
};

use super::Command;

/// Maximum number of [`ShortCode`]s tried for a single [`Session`] before
/// giving up.
pub const MAX_ATTEMPTS: usize = 20;

/// [`Command`] for creating a new [`Session`] out of a POS cart.
#[derive(Clone, Debug)]
pub struct CreateSyncSession {
    /// [`LineItem`]s of the cart.
    pub items: Vec<LineItem>,

    /// Total amount of the cart.
    pub total: Money,
}

impl<Db, Tx> Command<CreateSyncSession> for Service<Db, Tx>
where
    Db: Database<
        Insert<Session>,
        Ok = Option<Session>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: CreateSyncSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CreateSyncSession { items, total } = cmd;

        if items.is_empty() {
            return Err(tracerr::new!(E::EmptyCart));
        }
        let expected = session::total(&items)
            .ok_or(E::TotalOverflow)
            .map_err(tracerr::wrap!())?;
        if expected != total {
            return Err(tracerr::new!(E::TotalMismatch { expected, total }));
        }

        let mut candidate =
            Session::new(items, total, self.schedule().config().payable_for);
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(mut rejected) = self
                .database()
                .execute(Insert(candidate.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
            else {
                self.schedule().arm(candidate.id);
                log::info!(
                    "`Session(id: {}, code: {})` created",
                    candidate.id,
                    candidate.short_code,
                );
                return Ok(candidate);
            };

            log::debug!(
                "`ShortCode({})` is occupied, regenerating (attempt \
                 {attempt}/{MAX_ATTEMPTS})",
                rejected.short_code,
            );
            rejected.short_code = ShortCode::generate();
            candidate = rejected;
        }

        log::error!("no free `ShortCode` after {MAX_ATTEMPTS} attempts");
        Err(tracerr::new!(E::ShortCodeSpaceExhausted))
    }
}

/// Error of [`CreateSyncSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    #[from]
    Db(database::Error),

    /// Cart has no [`LineItem`]s.
    #[display("cart is empty")]
    EmptyCart,

    /// No free [`ShortCode`] has been found.
    #[display("no free `ShortCode` found")]
    ShortCodeSpaceExhausted,

    /// Sum of the [`LineItem`]s doesn't fit into [`Money`].
    #[display("cart items sum overflows")]
    TotalOverflow,

    /// Provided total doesn't match the [`LineItem`]s.
    #[display("cart total `{total}` doesn't match its items sum `{expected}`")]
    TotalMismatch {
        /// Sum of the [`LineItem`]s.
        expected: Money,

        /// Provided total.
        total: Money,
    },
}

#[cfg(test)]
mod spec {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use common::{
        operations::{By, Insert, Select},
        Money,
    };
    use futures::future;
    use tracerr::Traced;

    use crate::{
        domain::{
            session::{Identifier, LineItem, ShortCode, Status},
            Session,
        },
        infra::{database, Database, Ledger, Memory},
        task::Schedule,
        Command as _, Config, Service,
    };

    use super::{CreateSyncSession, ExecutionError, MAX_ATTEMPTS};

    /// [`Database`] with every [`ShortCode`] being occupied.
    #[derive(Clone, Debug, Default)]
    struct Occupied {
        /// Number of performed [`Insert`]s.
        inserts: Arc<AtomicUsize>,
    }

    impl Database<Insert<Session>> for Occupied {
        type Ok = Option<Session>;
        type Err = Traced<database::Error>;

        async fn execute(
            &self,
            Insert(session): Insert<Session>,
        ) -> Result<Self::Ok, Self::Err> {
            _ = self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(Some(session))
        }
    }

    fn service() -> Service<Memory, Ledger> {
        Service::new(Config::default(), Memory::default(), Ledger::default()).0
    }

    fn cart(json: &str, total: &str) -> CreateSyncSession {
        CreateSyncSession {
            items: serde_json::from_str::<Vec<LineItem>>(json).unwrap(),
            total: total.parse::<Money>().unwrap(),
        }
    }

    async fn select(
        svc: &Service<Memory, Ledger>,
        by: Identifier,
    ) -> Option<Session> {
        svc.database()
            .execute(Select(By::<Option<Session>, Identifier>::new(by)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_resolvable_session() {
        let svc = service();

        let session = svc
            .execute(cart(r#"[{"productId": "p1", "qty": 2, "price": 10}]"#, "20"))
            .await
            .unwrap();

        assert_eq!(session.status, Status::Pending);
        assert_eq!(session.id.to_string().len(), 36);
        assert_eq!(session.short_code.to_string().len(), ShortCode::LENGTH);
        assert!(svc.schedule().is_armed(session.id));

        let by_id = select(&svc, session.id.into()).await.unwrap();
        let by_code = select(&svc, session.short_code.clone().into()).await;
        assert_eq!(by_code.as_ref(), Some(&by_id));
        assert_eq!(by_id.status, Status::Pending);
    }

    #[tokio::test]
    async fn rejects_invalid_carts() {
        let svc = service();

        let empty = svc.execute(cart("[]", "0")).await.unwrap_err();
        assert!(matches!(empty.as_ref(), ExecutionError::EmptyCart));

        let mismatch = svc
            .execute(cart(
                r#"[{"productId": "p1", "qty": 2, "price": 10},
                    {"productId": "p2", "qty": 1, "price": "0.5"}]"#,
                "20",
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            mismatch.as_ref(),
            ExecutionError::TotalMismatch { .. },
        ));

        let overflow = svc
            .execute(cart(
                r#"[{"productId": "p1", "qty": 10,
                     "price": "79228162514264337593543950335"}]"#,
                "1",
            ))
            .await
            .unwrap_err();
        assert!(matches!(overflow.as_ref(), ExecutionError::TotalOverflow));

        assert!(svc
            .database()
            .execute(Select(By::<Vec<Session>, ()>::new(())))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn allocates_unique_codes() {
        let svc = service();

        let mut codes = HashSet::new();
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let s = svc
                .execute(cart(r#"[{"productId": "p", "qty": 1, "price": 1}]"#, "1"))
                .await
                .unwrap();
            assert!(ids.insert(s.id));
            assert!(codes.insert(s.short_code));
        }
    }

    #[tokio::test]
    async fn allocates_unique_codes_concurrently() {
        let svc = service();

        let created = future::join_all((0..500).map(|_| {
            svc.execute(cart(r#"[{"productId": "p", "qty": 1, "price": 1}]"#, "1"))
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

        let ids = created.iter().map(|s| s.id).collect::<HashSet<_>>();
        let codes = created
            .iter()
            .map(|s| s.short_code.clone())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 500);
        assert_eq!(codes.len(), 500);

        let stored = svc
            .database()
            .execute(Select(By::<Vec<Session>, ()>::new(())))
            .await
            .unwrap();
        assert_eq!(stored.len(), 500);
    }

    #[tokio::test]
    async fn gives_up_once_codes_are_exhausted() {
        let db = Occupied::default();
        let svc = Service {
            config: Config::default(),
            database: db.clone(),
            transactions: Ledger::default(),
            schedule: Schedule::new(Config::default().sessions),
        };

        let err = svc
            .execute(cart(r#"[{"productId": "p", "qty": 1, "price": 1}]"#, "1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::ShortCodeSpaceExhausted,
        ));
        assert_eq!(db.inserts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
