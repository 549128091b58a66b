//! [`Command`] for patching the [`Status`] of a [`Session`].

use common::operations::Update;
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{
            ErrorReason, Identifier, Patch, Status, Transition, Transitioned,
        },
        transaction, Session,
    },
    infra::{database, Database},
    Service,
};

use super::Command;

/// [`Command`] for moving a [`Status::Pending`] [`Session`] forward, along
/// with its payment metadata.
#[derive(Clone, Debug)]
pub struct UpdateSessionStatus {
    /// [`Identifier`] of the [`Session`] to update.
    pub identifier: Identifier,

    /// New [`Status`] of the [`Session`].
    pub status: Status,

    /// [`transaction::Id`] paying the [`Session`].
    ///
    /// Required for [`Status::Paid`] and forbidden otherwise.
    pub transaction_id: Option<transaction::Id>,

    /// [`ErrorReason`] of the failure.
    ///
    /// Accepted for [`Status::Failed`] only.
    pub error_reason: Option<ErrorReason>,
}

impl UpdateSessionStatus {
    /// Validates this [`UpdateSessionStatus`] into a [`Patch`].
    fn into_patch(self) -> Result<(Identifier, Patch), ExecutionError> {
        use ExecutionError as E;

        let Self {
            identifier,
            status,
            transaction_id,
            error_reason,
        } = self;

        match status {
            Status::Pending => return Err(E::InvalidStatus(status)),
            Status::Paid if transaction_id.is_none() => {
                return Err(E::TransactionIdRequired);
            }
            Status::Expired | Status::Failed if transaction_id.is_some() => {
                return Err(E::UnexpectedTransactionId(status));
            }
            Status::Paid | Status::Expired | Status::Failed => {}
        }
        if error_reason.is_some() && status != Status::Failed {
            return Err(E::UnexpectedErrorReason(status));
        }

        Ok((
            identifier,
            Patch {
                status,
                transaction_id,
                error_reason,
            },
        ))
    }
}

impl<Db, Tx> Command<UpdateSessionStatus> for Service<Db, Tx>
where
    Db: Database<
        Update<Transition>,
        Ok = Transitioned,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: UpdateSessionStatus,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let (by, patch) = cmd.into_patch().map_err(tracerr::wrap!())?;

        let transitioned = self
            .database()
            .execute(Update(Transition {
                by: by.clone(),
                patch,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        match transitioned {
            Transitioned::Applied(session) => {
                log::info!(
                    "`Session(id: {})` is `{}` now",
                    session.id,
                    session.status,
                );
                Ok(session)
            }
            Transitioned::Rejected(status) => {
                Err(tracerr::new!(E::InvalidState(status)))
            }
            Transitioned::Busy => Err(tracerr::new!(E::PaymentInProgress)),
            Transitioned::Missing => Err(tracerr::new!(E::SessionNotExists(by))),
        }
    }
}

/// Error of [`UpdateSessionStatus`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    #[from]
    Db(database::Error),

    /// [`Session`] cannot be moved into the requested [`Status`].
    #[display("`Session` cannot be moved into `{_0}` explicitly")]
    InvalidStatus(#[error(not(source))] Status),

    /// [`Session`] is not [`Status::Pending`] anymore.
    #[display("`Session` is already `{_0}`")]
    InvalidState(#[error(not(source))] Status),

    /// [`Session`] is being paid at the moment.
    #[display("`Session` payment is in progress")]
    PaymentInProgress,

    /// [`Session`] with the provided [`Identifier`] does not exist.
    #[display("`Session({_0})` does not exist")]
    SessionNotExists(#[error(not(source))] Identifier),

    /// [`Status::Paid`] requested without a [`transaction::Id`].
    #[display("`paid` status requires a transaction ID")]
    TransactionIdRequired,

    /// [`ErrorReason`] provided for a [`Status`] other than
    /// [`Status::Failed`].
    #[display("`{_0}` status doesn't accept an error reason")]
    UnexpectedErrorReason(#[error(not(source))] Status),

    /// [`transaction::Id`] provided for a [`Status`] other than
    /// [`Status::Paid`].
    #[display("`{_0}` status doesn't accept a transaction ID")]
    UnexpectedTransactionId(#[error(not(source))] Status),
}

#[cfg(test)]
mod spec {
    use common::operations::Insert;

    use crate::{
        domain::{
            session::{self, Identifier, Status},
            transaction, Session,
        },
        infra::{Database as _, Ledger, Memory},
        Command as _, Config, Service,
    };

    use super::{ExecutionError, UpdateSessionStatus};

    async fn service_with_session() -> (Service<Memory, Ledger>, Session) {
        let svc =
            Service::new(Config::default(), Memory::default(), Ledger::default())
                .0;
        let s = Session::new(
            serde_json::from_str(r#"[{"productId": "p1", "qty": 1, "price": 5}]"#)
                .unwrap(),
            "5".parse().unwrap(),
            svc.config().sessions.payable_for,
        );
        _ = svc.database().execute(Insert(s.clone())).await.unwrap();
        (svc, s)
    }

    fn update(by: impl Into<Identifier>, status: Status) -> UpdateSessionStatus {
        UpdateSessionStatus {
            identifier: by.into(),
            status,
            transaction_id: None,
            error_reason: None,
        }
    }

    #[tokio::test]
    async fn moves_pending_session_forward_once() {
        let (svc, s) = service_with_session().await;
        let tx_id = transaction::Id::new();

        let paid = svc
            .execute(UpdateSessionStatus {
                transaction_id: Some(tx_id),
                ..update(s.short_code.clone(), Status::Paid)
            })
            .await
            .unwrap();
        assert_eq!(paid.status, Status::Paid);
        assert_eq!(paid.transaction_id, Some(tx_id));

        for status in [Status::Expired, Status::Failed] {
            let err = svc.execute(update(s.id, status)).await.unwrap_err();
            assert!(matches!(
                err.as_ref(),
                ExecutionError::InvalidState(Status::Paid),
            ));
        }
    }

    #[tokio::test]
    async fn records_error_reason_of_failure() {
        let (svc, s) = service_with_session().await;

        let failed = svc
            .execute(UpdateSessionStatus {
                error_reason: Some("terminal offline".into()),
                ..update(s.id, Status::Failed)
            })
            .await
            .unwrap();

        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.error_reason.unwrap().to_string(), "terminal offline");
        assert!(failed.transaction_id.is_none());
    }

    #[tokio::test]
    async fn rejects_illegal_patches() {
        let (svc, s) = service_with_session().await;

        let err = svc.execute(update(s.id, Status::Pending)).await.unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::InvalidStatus(_)));

        let err = svc.execute(update(s.id, Status::Paid)).await.unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::TransactionIdRequired));

        let err = svc
            .execute(UpdateSessionStatus {
                transaction_id: Some(transaction::Id::new()),
                ..update(s.id, Status::Expired)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_ref(),
            ExecutionError::UnexpectedTransactionId(Status::Expired),
        ));

        let err = svc
            .execute(UpdateSessionStatus {
                error_reason: Some("nope".into()),
                ..update(s.id, Status::Expired)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_ref(),
            ExecutionError::UnexpectedErrorReason(Status::Expired),
        ));

        let err = svc
            .execute(update(session::Id::new(), Status::Expired))
            .await
            .unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::SessionNotExists(_)));
    }
}
