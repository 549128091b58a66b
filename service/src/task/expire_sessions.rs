//! [`ExpireSessions`] [`Task`].

use std::{
    collections::{BTreeSet, HashMap},
    convert::Infallible,
    error::Error,
    sync::Arc,
    time,
};

use common::operations::{By, Delete, Perform, Start, Update};
use parking_lot::Mutex;
use smart_default::SmartDefault;
use tokio::{
    sync::Notify,
    time::{sleep_until, Instant},
};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, Patch, Status, Transition, Transitioned},
        Session,
    },
    infra::{database, Database},
    Service,
};

use super::Task;

/// Delay before retrying a [`Deadline::Expire`] of a [`Session`] being paid.
pub const BUSY_RETRY: time::Duration = time::Duration::from_secs(1);

/// Configuration for [`ExpireSessions`] [`Task`].
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Period a [`Session`] stays payable after its creation.
    #[default(time::Duration::from_secs(30 * 60))]
    pub payable_for: time::Duration,

    /// Period an expired or settled [`Session`] stays visible before being
    /// removed.
    #[default(time::Duration::from_secs(30 * 60))]
    pub grace: time::Duration,
}

/// Deadline of a [`Session`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Deadline {
    /// [`Session`] stops being payable.
    Expire,

    /// [`Session`] is removed along with its [`session::ShortCode`].
    Reap,
}

/// [`Deadline`] of a [`Session`] which has come.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Due {
    /// ID of the [`Session`].
    pub session_id: session::Id,

    /// [`Deadline`] which has come.
    pub deadline: Deadline,
}

/// Schedule of [`Session`] [`Deadline`]s, driven by [`ExpireSessions`].
///
/// Arming or cancelling never blocks on the [`Task`] itself.
#[derive(Clone, Debug)]
pub struct Schedule {
    /// [`Config`] of the armed [`Deadline`]s.
    config: Config,

    /// [`Deadlines`] shared between all the clones of this [`Schedule`].
    deadlines: Arc<Mutex<Deadlines>>,

    /// Wakes up the [`ExpireSessions`] [`Task`] once an earlier
    /// [`Deadline`] may have been armed.
    rearmed: Arc<Notify>,
}

/// Pending [`Deadline`]s.
#[derive(Debug, Default)]
struct Deadlines {
    /// [`Deadline`]s ordered by their [`Instant`]s.
    queue: BTreeSet<(Instant, session::Id, Deadline)>,

    /// [`Deadline`]s of every [`Session`].
    by_session: HashMap<session::Id, Vec<(Instant, Deadline)>>,
}

impl Deadlines {
    /// Adds the provided [`Deadline`] to both indices.
    fn insert(
        &mut self,
        session_id: session::Id,
        deadline: Deadline,
        at: Instant,
    ) {
        _ = self.queue.insert((at, session_id, deadline));
        self.by_session
            .entry(session_id)
            .or_default()
            .push((at, deadline));
    }
}

impl Schedule {
    /// Creates a new empty [`Schedule`] with the provided [`Config`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            deadlines: Arc::default(),
            rearmed: Arc::default(),
        }
    }

    /// Returns [`Config`] of this [`Schedule`].
    #[must_use]
    pub fn config(&self) -> Config {
        self.config
    }

    /// Arms both [`Deadline`]s of the [`Session`] with the provided
    /// [`session::Id`], counting from now.
    pub fn arm(&self, session_id: session::Id) {
        let expire_at = Instant::now() + self.config.payable_for;
        let reap_at = expire_at + self.config.grace;

        {
            let mut deadlines = self.deadlines.lock();
            deadlines.insert(session_id, Deadline::Expire, expire_at);
            deadlines.insert(session_id, Deadline::Reap, reap_at);
        }

        self.rearmed.notify_one();
    }

    /// Arms the provided [`Deadline`] of the [`Session`] with the provided
    /// [`session::Id`] once again, at the provided [`Instant`].
    pub fn defer(
        &self,
        session_id: session::Id,
        deadline: Deadline,
        at: Instant,
    ) {
        self.deadlines.lock().insert(session_id, deadline, at);
        self.rearmed.notify_one();
    }

    /// Cancels all the [`Deadline`]s of the [`Session`] with the provided
    /// [`session::Id`].
    ///
    /// Returns `false` if there were none.
    pub fn cancel(&self, session_id: session::Id) -> bool {
        let mut deadlines = self.deadlines.lock();
        let deadlines = &mut *deadlines;
        let Some(armed) = deadlines.by_session.remove(&session_id) else {
            return false;
        };
        for (at, deadline) in armed {
            _ = deadlines.queue.remove(&(at, session_id, deadline));
        }
        true
    }

    /// Indicates whether the [`Session`] with the provided [`session::Id`]
    /// has any [`Deadline`]s armed.
    #[must_use]
    pub fn is_armed(&self, session_id: session::Id) -> bool {
        self.deadlines.lock().by_session.contains_key(&session_id)
    }

    /// Returns the [`Instant`] of the nearest armed [`Deadline`].
    fn next(&self) -> Option<Instant> {
        self.deadlines.lock().queue.first().map(|(at, ..)| *at)
    }

    /// Disarms and returns all the [`Deadline`]s due at the provided
    /// [`Instant`].
    fn take_due(&self, now: Instant) -> Vec<Due> {
        let mut deadlines = self.deadlines.lock();
        let deadlines = &mut *deadlines;

        let mut due = Vec::new();
        while let Some(&(at, session_id, deadline)) = deadlines.queue.first() {
            if at > now {
                break;
            }
            _ = deadlines.queue.pop_first();
            if let Some(armed) = deadlines.by_session.get_mut(&session_id) {
                armed.retain(|d| *d != (at, deadline));
                if armed.is_empty() {
                    _ = deadlines.by_session.remove(&session_id);
                }
            }
            due.push(Due {
                session_id,
                deadline,
            });
        }
        due
    }
}

/// [`Task`] for expiring unpaid [`Session`]s and removing stale ones.
#[derive(Clone, Debug)]
pub struct ExpireSessions<S> {
    /// [`Schedule`] driving this [`Task`].
    schedule: Schedule,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Tx> Task<Start<By<ExpireSessions<Self>, Schedule>>>
    for Service<Db, Tx>
where
    ExpireSessions<Service<Db, Tx>>:
        Task<Perform<Due>, Ok = (), Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<ExpireSessions<Self>, Schedule>>,
    ) -> Result<Self::Ok, Self::Err> {
        let task = ExpireSessions {
            schedule: by.into_inner(),
            service: self.clone(),
        };

        loop {
            let rearmed = task.schedule.rearmed.notified();
            let Some(at) = task.schedule.next() else {
                rearmed.await;
                continue;
            };
            tokio::select! {
                () = sleep_until(at) => {}
                () = rearmed => continue,
            }

            for due in task.schedule.take_due(Instant::now()) {
                _ = task.execute(Perform(due)).await.map_err(|e| {
                    log::error!(
                        "`task::ExpireSessions` failed on {:?} of \
                         `Session(id: {})`: {e}",
                        due.deadline,
                        due.session_id,
                    );
                });
            }
        }
    }
}

impl<Db, Tx> Task<Perform<Due>> for ExpireSessions<Service<Db, Tx>>
where
    Db: Database<
            Update<Transition>,
            Ok = Transitioned,
            Err = Traced<database::Error>,
        > + Database<
            Delete<By<Session, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
{
    type Ok = ();
    type Err = ExecutionError;

    async fn execute(
        &self,
        Perform(due): Perform<Due>,
    ) -> Result<Self::Ok, Self::Err> {
        let Due {
            session_id,
            deadline,
        } = due;
        let db = self.service.database();

        match deadline {
            Deadline::Expire => {
                let transitioned = db
                    .execute(Update(Transition {
                        by: session_id.into(),
                        patch: Patch::status(Status::Expired),
                    }))
                    .await
                    .map_err(tracerr::wrap!())?;
                match transitioned {
                    Transitioned::Applied(_) => {
                        log::info!("`Session(id: {session_id})` expired");
                    }
                    // Payment may still be abandoned without a settlement.
                    Transitioned::Busy => {
                        log::debug!(
                            "`Session(id: {session_id})` is being paid, \
                             retrying expiration in {BUSY_RETRY:?}",
                        );
                        self.schedule.defer(
                            session_id,
                            Deadline::Expire,
                            Instant::now() + BUSY_RETRY,
                        );
                    }
                    Transitioned::Rejected(_) | Transitioned::Missing => {
                        log::debug!(
                            "`Session(id: {session_id})` is not expired: \
                             {transitioned}",
                        );
                    }
                }
            }
            Deadline::Reap => {
                let removed = db
                    .execute(Delete(By::new(session_id)))
                    .await
                    .map_err(tracerr::wrap!())?;
                if let Some(s) = removed {
                    log::debug!(
                        "`Session(id: {session_id})` removed as `{}`",
                        s.status,
                    );
                }
            }
        }
        Ok(())
    }
}

/// Error of [`ExpireSessions`] execution.
pub type ExecutionError = Traced<database::Error>;

#[cfg(test)]
mod spec {
    use std::{future::Future, time::Duration};

    use common::operations::{By, Insert, Lock, Select, Start};
    use tokio::time::{advance, sleep, timeout, Instant};
    use tracerr::Traced;

    use crate::{
        command::{process_payment, ProcessPayment},
        domain::{
            session::{Identifier, Status},
            transaction::{self, PaymentInfo},
            Order, Session,
        },
        infra::{transactions, Database as _, Ledger, Memory, Transactions},
        Config, Service,
    };

    use super::{Config as ExpiryConfig, Deadline, Schedule, Task as _};

    const MINUTE: Duration = Duration::from_secs(60);

    /// [`Ledger`] answering in 5 minutes.
    #[derive(Clone, Debug, Default)]
    struct Sluggish(Ledger);

    impl Transactions<Insert<Order>> for Sluggish {
        type Ok = transaction::Id;
        type Err = Traced<transactions::Error>;

        async fn execute(
            &self,
            op: Insert<Order>,
        ) -> Result<Self::Ok, Self::Err> {
            sleep(5 * MINUTE).await;
            self.0.execute(op).await
        }
    }

    fn config() -> ExpiryConfig {
        ExpiryConfig {
            payable_for: 30 * MINUTE,
            grace: 30 * MINUTE,
        }
    }

    fn session() -> Session {
        Session::new(
            serde_json::from_str(r#"[{"productId": "p1", "qty": 1, "price": 5}]"#)
                .unwrap(),
            "5".parse().unwrap(),
            config().payable_for,
        )
    }

    /// Creates a new [`Service`] with a single armed [`Session`].
    async fn service<Tx>(tx: Tx) -> (Service<Memory, Tx>, Session)
    where
        Tx: Clone + 'static,
    {
        let (svc, _) =
            Service::new(Config { sessions: config() }, Memory::default(), tx);
        let s = session();
        _ = svc.database().execute(Insert(s.clone())).await.unwrap();
        svc.schedule().arm(s.id);
        (svc, s)
    }

    fn pay(s: &Session) -> ProcessPayment {
        ProcessPayment {
            identifier: s.id.into(),
            payment: PaymentInfo {
                user_id: None,
                amount: Some(s.total),
            },
        }
    }

    /// Runs the [`super::ExpireSessions`] [`super::Task`] on the provided
    /// [`Service`] concurrently with the provided scenario.
    async fn with_task<Tx, F>(svc: &Service<Memory, Tx>, scenario: F)
    where
        Tx: Clone + 'static,
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = svc.execute(Start(By::new(svc.schedule().clone()))) => {
                unreachable!("`task::ExpireSessions` never stops")
            }
            () = scenario => {}
        }
    }

    async fn status<Tx>(
        svc: &Service<Memory, Tx>,
        s: &Session,
    ) -> Option<Status> {
        svc.database()
            .execute(Select(By::<Option<Session>, Identifier>::new(s.id.into())))
            .await
            .unwrap()
            .map(|s| s.status)
    }

    #[tokio::test(start_paused = true)]
    async fn takes_due_deadlines_in_order() {
        let schedule = Schedule::new(config());
        let first = session();
        let second = session();

        schedule.arm(first.id);
        advance(MINUTE).await;
        schedule.arm(second.id);

        assert!(schedule.take_due(Instant::now()).is_empty());

        let due = schedule.take_due(Instant::now() + 30 * MINUTE);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].session_id, first.id);
        assert_eq!(due[1].session_id, second.id);
        assert!(due.iter().all(|d| d.deadline == Deadline::Expire));

        assert!(schedule.is_armed(first.id));
        assert!(schedule.cancel(first.id));
        assert!(!schedule.is_armed(first.id));
        assert!(!schedule.cancel(first.id));

        let due = schedule.take_due(Instant::now() + 60 * MINUTE);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].session_id, second.id);
        assert_eq!(due[0].deadline, Deadline::Reap);
        assert!(!schedule.is_armed(second.id));
    }

    #[tokio::test(start_paused = true)]
    async fn defers_deadlines() {
        let schedule = Schedule::new(config());
        let s = session();

        schedule.defer(s.id, Deadline::Expire, Instant::now() + MINUTE);
        assert!(schedule.is_armed(s.id));
        assert!(schedule.take_due(Instant::now()).is_empty());

        let due = schedule.take_due(Instant::now() + MINUTE);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].deadline, Deadline::Expire);
        assert!(!schedule.is_armed(s.id));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_then_removes_unpaid_session() {
        let (svc, s) = service(Ledger::default()).await;

        with_task(&svc, async {
            sleep(29 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Pending));

            sleep(2 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Expired));

            sleep(30 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, None);
            assert!(!svc.schedule().is_armed(s.id));
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_paid_session_until_removal() {
        let (svc, s) = service(Ledger::default()).await;

        with_task(&svc, async {
            sleep(10 * MINUTE).await;
            let tx_id = svc.execute(pay(&s)).await.unwrap();

            sleep(21 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Paid));

            sleep(20 * MINUTE).await;
            let paid = svc
                .database()
                .execute(Select(By::<Option<Session>, Identifier>::new(
                    s.short_code.clone().into(),
                )))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(paid.status, Status::Paid);
            assert_eq!(paid.transaction_id, Some(tx_id));

            sleep(10 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, None);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_expiring_session_being_paid() {
        let (svc, s) = service(Ledger::default()).await;
        let claim = svc.database().execute(Lock(By::new(s.id))).await.unwrap();
        assert!(claim.is_some());

        with_task(&svc, async {
            sleep(31 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Pending));
            assert!(svc.schedule().is_armed(s.id));

            drop(claim);
            sleep(2 * super::BUSY_RETRY).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Expired));
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn expires_session_once_payment_is_abandoned() {
        let sluggish = Sluggish::default();
        let (svc, s) = service(sluggish.clone()).await;

        with_task(&svc, async {
            sleep(29 * MINUTE).await;
            let abandoned = timeout(2 * MINUTE, svc.execute(pay(&s))).await;
            assert!(abandoned.is_err());

            sleep(5 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Expired));

            let err = svc.execute(pay(&s)).await.unwrap_err();
            assert!(matches!(
                err.as_ref(),
                process_payment::ExecutionError::InvalidState(Status::Expired),
            ));
        })
        .await;

        assert!(sluggish.0.recorded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_up_once_armed() {
        let (svc, _) = Service::new(
            Config { sessions: config() },
            Memory::default(),
            Ledger::default(),
        );

        with_task(&svc, async {
            sleep(5 * MINUTE).await;
            let s = session();
            _ = svc.database().execute(Insert(s.clone())).await.unwrap();
            svc.schedule().arm(s.id);

            sleep(29 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Pending));

            sleep(2 * MINUTE).await;
            assert_eq!(status(&svc, &s).await, Some(Status::Expired));
        })
        .await;
    }
}
