//! [`Query`] collection related to multiple [`Session`]s.

use common::operations::By;

use crate::domain::Session;
#[cfg(doc)]
use crate::Query;

use super::DatabaseQuery;

/// Queries all the live [`Session`]s.
pub type All = DatabaseQuery<By<Vec<Session>, ()>>;
