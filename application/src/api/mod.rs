//! REST API definitions.

pub mod cart;

use axum::http::StatusCode;

use crate::define_error;

define_error! {
    enum SessionError {
        #[code = "SESSION_NOT_EXISTS"]
        #[status = NOT_FOUND]
        #[message = "Cart session does not exist"]
        NotExists,

        #[code = "INVALID_SESSION_STATE"]
        #[status = CONFLICT]
        #[message = "Cart session cannot be changed anymore"]
        InvalidState,

        #[code = "PAYMENT_IN_PROGRESS"]
        #[status = CONFLICT]
        #[message = "Cart session is being paid at the moment"]
        PaymentInProgress,
    }
}

/// Liveness probe.
#[expect(clippy::unused_async, reason = "`async` is required by `axum`")]
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
