//! [`Command`] definition.

pub mod cancel_sync_session;
pub mod create_sync_session;
pub mod process_payment;
pub mod update_session_status;

/// [`Command`] of the [`Service`].
///
/// [`Service`]: crate::Service
pub use common::Handler as Command;

pub use self::{
    cancel_sync_session::CancelSyncSession,
    create_sync_session::CreateSyncSession, process_payment::ProcessPayment,
    update_session_status::UpdateSessionStatus,
};
