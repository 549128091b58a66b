//! Service contains the business logic of cart synchronization.
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod command;
pub mod domain;
pub mod infra;
pub mod query;
pub mod task;

use std::error::Error;

use common::operations::{By, Start};
use derive_more::Debug;

#[cfg(doc)]
use infra::{Database, Transactions};

pub use self::{command::Command, query::Query, task::Task};

/// [`Service`] configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// [`task::ExpireSessions`] configuration.
    pub sessions: task::expire_sessions::Config,
}

/// Domain service.
#[derive(Clone, Debug)]
pub struct Service<Db, Tx> {
    /// Configuration of this [`Service`].
    config: Config,

    /// [`Database`] of this [`Service`].
    database: Db,

    /// [`Transactions`] collaborator of this [`Service`].
    transactions: Tx,

    /// [`task::Schedule`] of [`Session`] deadlines.
    ///
    /// [`Session`]: domain::Session
    #[debug(skip)]
    schedule: task::Schedule,
}

impl<Db, Tx> Service<Db, Tx> {
    /// Creates a new [`Service`] with the provided parameters.
    ///
    /// The returned [`task::Background`] must be awaited for [`Session`]s
    /// to ever expire.
    ///
    /// [`Session`]: domain::Session
    pub fn new(
        config: Config,
        database: Db,
        transactions: Tx,
    ) -> (Self, task::Background)
    where
        Self: Task<
                Start<By<task::ExpireSessions<Self>, task::Schedule>>,
                Ok = (),
                Err: Error,
            > + Clone
            + 'static,
    {
        let this = Service {
            config,
            database,
            transactions,
            schedule: task::Schedule::new(config.sessions),
        };

        let mut bg = task::Background::default();
        let svc = this.clone();
        bg.spawn("ExpireSessions", async move {
            svc.execute(Start(By::new(svc.schedule().clone()))).await
        });

        (this, bg)
    }

    /// Returns [`Config`] of this [`Service`].
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns [`Database`] of this [`Service`].
    #[must_use]
    pub fn database(&self) -> &Db {
        &self.database
    }

    /// Returns [`Transactions`] collaborator of this [`Service`].
    #[must_use]
    pub fn transactions(&self) -> &Tx {
        &self.transactions
    }

    /// Returns [`task::Schedule`] of this [`Service`].
    #[must_use]
    pub fn schedule(&self) -> &task::Schedule {
        &self.schedule
    }
}
