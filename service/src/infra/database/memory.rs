//! In-memory [`Database`] of [`Session`]s.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use common::operations::{By, Delete, Insert, Lock, Select, Update};
use derive_more::{Display, Error as StdError};
use parking_lot::Mutex;
use tracerr::Traced;

use crate::domain::{
    session::{self, Identifier, Settlement, ShortCode, Transition, Transitioned},
    Session,
};

use super::Database;

/// In-memory [`Database`] of [`Session`]s.
///
/// Owns both the [`session::Id`] and the [`ShortCode`] indices behind a
/// single lock, so a [`Session`] is either visible by both of them or by
/// none.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    /// [`Indices`] shared between all the clones of this [`Memory`].
    indices: Arc<Mutex<Indices>>,
}

/// Indices of the stored [`Session`]s.
#[derive(Debug, Default)]
struct Indices {
    /// [`Session`]s by their [`session::Id`]s.
    by_id: HashMap<session::Id, Session>,

    /// [`session::Id`]s by [`ShortCode`]s.
    by_code: HashMap<ShortCode, session::Id>,

    /// [`session::Id`]s of the [`Session`]s being paid at the moment.
    claimed: HashSet<session::Id>,
}

impl Indices {
    /// Resolves the provided [`Identifier`] into a stored [`session::Id`].
    fn resolve(&self, by: &Identifier) -> Option<session::Id> {
        match by {
            Identifier::Id(id) => self.by_id.contains_key(id).then_some(*id),
            Identifier::ShortCode(code) => self.by_code.get(code).copied(),
        }
    }

    /// Applies the provided [`session::Patch`] to the [`Session`] with the
    /// provided [`session::Id`], if it's still [`session::Status::Pending`]
    /// and is either not claimed or the caller is its claimant.
    fn transition(
        &mut self,
        id: Option<session::Id>,
        patch: session::Patch,
        claimant: bool,
    ) -> Transitioned {
        let Some(session) = id.and_then(|id| self.by_id.get_mut(&id)) else {
            return Transitioned::Missing;
        };
        if !session.is_pending() {
            return Transitioned::Rejected(session.status);
        }
        if !claimant && self.claimed.contains(&session.id) {
            return Transitioned::Busy;
        }

        session.apply(patch);
        Transitioned::Applied(session.clone())
    }
}

/// Exclusive claim on paying a [`Session`].
///
/// Released once dropped.
#[derive(Debug)]
pub struct Claim {
    /// ID of the claimed [`Session`].
    session_id: session::Id,

    /// [`Indices`] holding the claim.
    indices: Arc<Mutex<Indices>>,
}

impl Claim {
    /// Returns ID of the claimed [`Session`].
    #[must_use]
    pub fn session_id(&self) -> session::Id {
        self.session_id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        _ = self.indices.lock().claimed.remove(&self.session_id);
    }
}

impl Database<Insert<Session>> for Memory {
    /// Returns the provided [`Session`] back if its [`ShortCode`] is
    /// occupied by another live [`Session`].
    type Ok = Option<Session>;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Insert(session): Insert<Session>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut indices = self.indices.lock();

        if indices.by_id.contains_key(&session.id) {
            return Err(tracerr::new!(super::Error::from(
                Error::IdOccupied(session.id)
            )));
        }
        if indices.by_code.contains_key(&session.short_code) {
            return Ok(Some(session));
        }

        _ = indices.by_code.insert(session.short_code.clone(), session.id);
        _ = indices.by_id.insert(session.id, session);
        Ok(None)
    }
}

impl Database<Select<By<Option<Session>, Identifier>>> for Memory {
    type Ok = Option<Session>;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Session>, Identifier>>,
    ) -> Result<Self::Ok, Self::Err> {
        let indices = self.indices.lock();
        Ok(indices
            .resolve(by.as_inner())
            .and_then(|id| indices.by_id.get(&id))
            .cloned())
    }
}

impl Database<Select<By<Vec<Session>, ()>>> for Memory {
    type Ok = Vec<Session>;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        _: Select<By<Vec<Session>, ()>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.indices.lock().by_id.values().cloned().collect())
    }
}

impl Database<Update<Transition>> for Memory {
    type Ok = Transitioned;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Update(transition): Update<Transition>,
    ) -> Result<Self::Ok, Self::Err> {
        let Transition { by, patch } = transition;

        let mut indices = self.indices.lock();
        let id = indices.resolve(&by);
        Ok(indices.transition(id, patch, false))
    }
}

impl Database<Update<Settlement>> for Memory {
    type Ok = Transitioned;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Update(settlement): Update<Settlement>,
    ) -> Result<Self::Ok, Self::Err> {
        let Settlement {
            session_id,
            outcome,
        } = settlement;

        Ok(self.indices.lock().transition(
            Some(session_id),
            outcome.into(),
            true,
        ))
    }
}

impl Database<Lock<By<Session, session::Id>>> for Memory {
    /// [`None`] if the [`Session`] is missing, not pending, or already
    /// claimed.
    type Ok = Option<Claim>;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Session, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        let mut indices = self.indices.lock();
        let claimable = indices.by_id.get(&id).is_some_and(Session::is_pending);
        Ok((claimable && indices.claimed.insert(id)).then(|| Claim {
            session_id: id,
            indices: Arc::clone(&self.indices),
        }))
    }
}

impl Database<Delete<By<Session, session::Id>>> for Memory {
    /// Removed [`Session`], if there was any.
    type Ok = Option<Session>;
    type Err = Traced<super::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<Session, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        let mut indices = self.indices.lock();
        let Some(session) = indices.by_id.remove(&id) else {
            return Ok(None);
        };
        _ = indices.by_code.remove(&session.short_code);
        _ = indices.claimed.remove(&id);
        Ok(Some(session))
    }
}

/// [`Memory`] error.
#[derive(Clone, Copy, Debug, Display, StdError)]
pub enum Error {
    /// [`Session`] with the same [`session::Id`] is stored already.
    #[display("`Session(id: {_0})` already exists")]
    IdOccupied(#[error(not(source))] session::Id),
}
