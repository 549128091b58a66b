//! [`Command`] for cancelling a [`Session`].

use common::operations::{By, Delete, Lock, Select};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, Identifier, Status},
        Session,
    },
    infra::{database, Database},
    Service,
};

use super::Command;

/// [`Command`] for removing a [`Status::Pending`] [`Session`] early, once
/// its POS cart is abandoned.
#[derive(Clone, Debug)]
pub struct CancelSyncSession {
    /// [`Identifier`] of the [`Session`] to cancel.
    pub identifier: Identifier,
}

impl<Db, Tx, C> Command<CancelSyncSession> for Service<Db, Tx>
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
            Delete<By<Session, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
{
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: CancelSyncSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CancelSyncSession { identifier } = cmd;

        let current = self
            .database()
            .execute(Select(By::new(identifier.clone())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        let session_id = match current {
            None => return Err(tracerr::new!(E::SessionNotExists(identifier))),
            Some(s) if !s.is_pending() => {
                return Err(tracerr::new!(E::InvalidState(s.status)));
            }
            Some(s) => s.id,
        };

        // Holding the claim keeps payments away until the removal.
        let claim = self
            .database()
            .execute(Lock(By::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if claim.is_none() {
            let current = self
                .database()
                .execute(Select(By::new(session_id.into())))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Err(tracerr::new!(match current {
                Some(s) if !s.is_pending() => E::InvalidState(s.status),
                Some(_) => E::PaymentInProgress,
                None => E::SessionNotExists(identifier),
            }));
        }

        let removed = self
            .database()
            .execute(Delete(By::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        drop(claim);
        _ = self.schedule().cancel(session_id);

        let session = removed
            .ok_or(E::SessionNotExists(identifier))
            .map_err(tracerr::wrap!())?;
        log::info!("`Session(id: {session_id})` cancelled");
        Ok(session)
    }
}

/// Error of [`CancelSyncSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    #[from]
    Db(database::Error),

    /// [`Session`] is not [`Status::Pending`] anymore.
    #[display("`Session` is already `{_0}`")]
    InvalidState(#[error(not(source))] Status),

    /// [`Session`] is being paid at the moment.
    #[display("`Session` payment is in progress")]
    PaymentInProgress,

    /// [`Session`] with the provided [`Identifier`] does not exist.
    #[display("`Session({_0})` does not exist")]
    SessionNotExists(#[error(not(source))] Identifier),
}
