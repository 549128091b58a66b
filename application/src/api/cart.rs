//! Cart synchronization REST endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path},
    http::StatusCode,
    Extension, Json,
};
use common::Money;
use serde::{Deserialize, Serialize};
use service::{
    command,
    domain::{
        session::{self, ErrorReason, Identifier, LineItem, ShortCode, Status},
        transaction::{self, PaymentInfo, UserId},
        Session,
    },
    query, Command as _, Query as _,
};

use crate::{api::SessionError, define_error, AsError, Error, Service};

define_error! {
    enum CartError {
        #[code = "INVALID_CART"]
        #[status = BAD_REQUEST]
        #[message = "Cart is invalid"]
        Invalid,

        #[code = "SHORT_CODE_SPACE_EXHAUSTED"]
        #[status = INTERNAL_SERVER_ERROR]
        #[message = "No free short code is available at the moment"]
        ShortCodeSpaceExhausted,
    }
}

define_error! {
    enum StatusError {
        #[code = "INVALID_STATUS"]
        #[status = BAD_REQUEST]
        #[message = "Requested status change is invalid"]
        Invalid,
    }
}

define_error! {
    enum PaymentError {
        #[code = "AMOUNT_MISMATCH"]
        #[status = BAD_REQUEST]
        #[message = "Paid amount doesn't match the cart total"]
        AmountMismatch,

        #[code = "PAYMENT_FAILED"]
        #[status = PAYMENT_REQUIRED]
        #[message = "Payment has failed"]
        Failed,
    }
}

/// Cart submitted by a POS terminal.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCart {
    /// [`LineItem`]s of the cart.
    pub items: Vec<LineItem>,

    /// Total amount of the cart.
    pub total: Money,
}

/// Newly created cart [`Session`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    /// ID of the created [`Session`].
    pub session_id: session::Id,

    /// [`ShortCode`] to be typed on a mobile client.
    pub short_code: ShortCode,

    /// Moment the cart stops being payable.
    #[serde(with = "common::datetime::serde::rfc3339")]
    pub expires_at: session::ExpirationDateTime,
}

/// Cart picked up by a mobile client.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedCart {
    /// [`LineItem`]s of the cart.
    pub items: Vec<LineItem>,

    /// Total amount of the cart.
    pub total: Money,

    /// ID of the cart [`Session`].
    pub session_id: session::Id,
}

/// Status change requested for a cart [`Session`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// Requested [`Status`].
    pub status: String,

    /// ID of the paying transaction.
    #[serde(default)]
    pub transaction_id: Option<transaction::Id>,

    /// Reason of the payment failure.
    #[serde(default)]
    pub error_reason: Option<ErrorReason>,
}

/// Payment of a cart from a mobile client.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Either ID or [`ShortCode`] of the paid [`Session`].
    pub session_id: String,

    /// ID of the payer.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Amount the payer agreed to pay.
    #[serde(default)]
    pub amount: Option<Money>,
}

/// Successful payment of a cart.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paid {
    /// ID of the created transaction.
    pub transaction_id: transaction::Id,
}

/// Extracts a JSON body, reporting malformed contents as the provided
/// [`Error`].
fn body<T>(
    body: Result<Json<T>, JsonRejection>,
    invalid: impl Into<Error>,
) -> Result<T, Error> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(e @ JsonRejection::JsonDataError(_)) => {
            Err(invalid.into().with_message(&e.body_text()))
        }
        Err(e) => Err(e.into_error()),
    }
}

/// Parses the provided `raw` [`Identifier`].
///
/// Malformed ones cannot identify any [`Session`].
fn identifier(raw: &str) -> Result<Identifier, Error> {
    raw.parse().map_err(|_| SessionError::NotExists.into())
}

/// Creates a new cart [`Session`] on behalf of a POS terminal.
///
/// # Errors
///
/// Possible error codes:
/// - `INVALID_CART` - cart is empty or its total doesn't match its items;
/// - `SHORT_CODE_SPACE_EXHAUSTED` - no free short code has been found.
#[tracing::instrument(skip_all, fields(http.handler = "createSyncSession"))]
pub async fn create(
    Extension(service): Extension<Service>,
    cart: Result<Json<NewCart>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), Error> {
    let NewCart { items, total } = body(cart, CartError::Invalid)?;

    let session = service
        .execute(command::CreateSyncSession { items, total })
        .await
        .map_err(AsError::into_error)?;

    Ok((
        StatusCode::CREATED,
        Json(Created {
            session_id: session.id,
            short_code: session.short_code,
            expires_at: session.expires_at,
        }),
    ))
}

/// Picks up a still payable cart by its [`ShortCode`].
///
/// # Errors
///
/// Possible error codes:
/// - `SESSION_NOT_EXISTS` - no payable cart has the provided short code.
#[tracing::instrument(
    skip_all,
    fields(http.handler = "resolveShortCode", short_code = %code),
)]
pub async fn resolve(
    Extension(service): Extension<Service>,
    Path(code): Path<String>,
) -> Result<Json<SyncedCart>, Error> {
    let code = code
        .parse::<ShortCode>()
        .map_err(|_| Error::from(SessionError::NotExists))?;

    let session = service
        .execute(query::session::ByIdentifier::by(code.into()))
        .await
        .map_err(AsError::into_error)?
        .filter(Session::is_pending)
        .ok_or_else(|| Error::from(SessionError::NotExists))?;

    Ok(Json(SyncedCart {
        items: session.items,
        total: session.total,
        session_id: session.id,
    }))
}

/// Returns a cart [`Session`] by either its ID or its [`ShortCode`].
///
/// # Errors
///
/// Possible error codes:
/// - `SESSION_NOT_EXISTS` - no cart is identified by the provided value.
#[tracing::instrument(
    skip_all,
    fields(http.handler = "getSyncedCart", session = %id),
)]
pub async fn get(
    Extension(service): Extension<Service>,
    Path(id): Path<String>,
) -> Result<Json<Session>, Error> {
    let by = identifier(&id)?;

    service
        .execute(query::session::ByIdentifier::by(by))
        .await
        .map_err(AsError::into_error)?
        .map(Json)
        .ok_or_else(|| SessionError::NotExists.into())
}

/// Moves a pending cart [`Session`] into the requested [`Status`].
///
/// # Errors
///
/// Possible error codes:
/// - `INVALID_STATUS` - requested status change is not allowed;
/// - `SESSION_NOT_EXISTS` - no cart is identified by the provided value;
/// - `INVALID_SESSION_STATE` - cart is not pending anymore;
/// - `PAYMENT_IN_PROGRESS` - cart is being paid at the moment.
#[tracing::instrument(
    skip_all,
    fields(http.handler = "updateSessionStatus", session = %id),
)]
pub async fn update_status(
    Extension(service): Extension<Service>,
    Path(id): Path<String>,
    change: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Json<Session>, Error> {
    let StatusChange {
        status,
        transaction_id,
        error_reason,
    } = body(change, StatusError::Invalid)?;
    let status = status.parse::<Status>().map_err(|_| {
        Error::from(StatusError::Invalid)
            .with_message(&format!("Unknown status `{status}`"))
    })?;
    let identifier = identifier(&id)?;

    service
        .execute(command::UpdateSessionStatus {
            identifier,
            status,
            transaction_id,
            error_reason,
        })
        .await
        .map(Json)
        .map_err(AsError::into_error)
}

/// Pays a pending cart on behalf of a mobile client.
///
/// # Errors
///
/// Possible error codes:
/// - `SESSION_NOT_EXISTS` - no cart is identified by the provided value;
/// - `INVALID_SESSION_STATE` - cart is not pending anymore;
/// - `AMOUNT_MISMATCH` - provided amount differs from the cart total;
/// - `PAYMENT_IN_PROGRESS` - cart is being paid at the moment;
/// - `PAYMENT_FAILED` - payment has been declined, the cart is failed now.
#[tracing::instrument(
    skip_all,
    fields(http.handler = "processPayment", session = tracing::field::Empty),
)]
pub async fn process_payment(
    Extension(service): Extension<Service>,
    payment: Result<Json<Payment>, JsonRejection>,
) -> Result<Json<Paid>, Error> {
    let Payment {
        session_id,
        user_id,
        amount,
    } = payment.map_err(AsError::into_error)?.0;
    _ = tracing::Span::current().record("session", session_id.as_str());
    let identifier = identifier(&session_id)?;

    service
        .execute(command::ProcessPayment {
            identifier,
            payment: PaymentInfo {
                user_id: user_id.and_then(UserId::new),
                amount,
            },
        })
        .await
        .map(|transaction_id| Json(Paid { transaction_id }))
        .map_err(AsError::into_error)
}

/// Removes a pending cart abandoned by its POS terminal.
///
/// # Errors
///
/// Possible error codes:
/// - `SESSION_NOT_EXISTS` - no cart is identified by the provided value;
/// - `INVALID_SESSION_STATE` - cart is not pending anymore;
/// - `PAYMENT_IN_PROGRESS` - cart is being paid at the moment.
#[tracing::instrument(
    skip_all,
    fields(http.handler = "cancelSyncSession", session = %id),
)]
pub async fn cancel(
    Extension(service): Extension<Service>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    let identifier = identifier(&id)?;

    _ = service
        .execute(command::CancelSyncSession { identifier })
        .await
        .map_err(AsError::into_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Converts the provided not [`Status::Pending`] `status` into an [`Error`].
fn invalid_state(status: Status) -> Error {
    Error::from(SessionError::InvalidState)
        .with_message(&format!("Cart session is already {status}"))
}

impl AsError for command::create_sync_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        Some(match self {
            Self::Db(e) => return e.try_as_error(),
            Self::EmptyCart
            | Self::TotalMismatch { .. }
            | Self::TotalOverflow => {
                Error::from(CartError::Invalid).with_message(self)
            }
            Self::ShortCodeSpaceExhausted => {
                CartError::ShortCodeSpaceExhausted.into()
            }
        })
    }
}

impl AsError for command::update_session_status::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        Some(match self {
            Self::Db(e) => return e.try_as_error(),
            Self::InvalidStatus(_)
            | Self::TransactionIdRequired
            | Self::UnexpectedErrorReason(_)
            | Self::UnexpectedTransactionId(_) => {
                Error::from(StatusError::Invalid).with_message(self)
            }
            Self::InvalidState(status) => invalid_state(*status),
            Self::PaymentInProgress => SessionError::PaymentInProgress.into(),
            Self::SessionNotExists(_) => SessionError::NotExists.into(),
        })
    }
}

impl AsError for command::process_payment::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        Some(match self {
            Self::AmountMismatch { .. } => {
                Error::from(PaymentError::AmountMismatch).with_message(self)
            }
            Self::Db(e) => return e.try_as_error(),
            Self::InvalidState(status) => invalid_state(*status),
            Self::PaymentFailed(_) => {
                Error::from(PaymentError::Failed).with_message(self)
            }
            Self::PaymentInProgress => SessionError::PaymentInProgress.into(),
            Self::SessionNotExists(_) => SessionError::NotExists.into(),
        })
    }
}

impl AsError for command::cancel_sync_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        Some(match self {
            Self::Db(e) => return e.try_as_error(),
            Self::InvalidState(status) => invalid_state(*status),
            Self::PaymentInProgress => SessionError::PaymentInProgress.into(),
            Self::SessionNotExists(_) => SessionError::NotExists.into(),
        })
    }
}
