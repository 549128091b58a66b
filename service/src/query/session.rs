//! [`Query`] collection related to a single [`Session`].

use common::operations::By;

use crate::domain::{session::Identifier, Session};
#[cfg(doc)]
use crate::{domain::session, Query};

use super::DatabaseQuery;

/// Queries a [`Session`] either by its [`session::Id`] or by its
/// [`session::ShortCode`].
///
/// Never prolongs the lifetime of the [`Session`].
pub type ByIdentifier = DatabaseQuery<By<Option<Session>, Identifier>>;
