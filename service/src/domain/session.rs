//! [`Session`] definitions.

use std::{fmt, num::NonZeroU32, str::FromStr, time::Duration};

use common::{define_kind, unit, DateTime, DateTimeOf, Money};
use derive_more::{AsRef, Display, From, Into};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::transaction;

/// Cart synchronization session bridging a POS-originated cart to a mobile
/// payer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// ID of this [`Session`].
    #[serde(rename = "sessionId")]
    pub id: Id,

    /// [`ShortCode`] of this [`Session`].
    pub short_code: ShortCode,

    /// [`LineItem`]s of the synchronized cart.
    pub items: Vec<LineItem>,

    /// Total amount of the synchronized cart.
    pub total: Money,

    /// [`Status`] of this [`Session`].
    pub status: Status,

    /// [`DateTime`] when this [`Session`] was created.
    #[serde(with = "common::datetime::serde::rfc3339")]
    pub created_at: CreationDateTime,

    /// [`DateTime`] when this [`Session`] was last mutated.
    #[serde(with = "common::datetime::serde::rfc3339")]
    pub updated_at: ModificationDateTime,

    /// [`DateTime`] after which this [`Session`] cannot be paid anymore.
    #[serde(with = "common::datetime::serde::rfc3339")]
    pub expires_at: ExpirationDateTime,

    /// ID of the [`transaction`] paying this [`Session`], if it's paid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<transaction::Id>,

    /// Reason of the payment failure, if this [`Session`] has failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
}

impl Session {
    /// Creates a new [`Status::Pending`] [`Session`] for the provided cart,
    /// payable during the provided `payable_for` [`Duration`].
    #[must_use]
    pub fn new(
        items: Vec<LineItem>,
        total: Money,
        payable_for: Duration,
    ) -> Self {
        let now = DateTime::now();
        Self {
            id: Id::new(),
            short_code: ShortCode::generate(),
            items,
            total,
            status: Status::Pending,
            created_at: now.coerce(),
            updated_at: now.coerce(),
            expires_at: (now + payable_for).coerce(),
            transaction_id: None,
            error_reason: None,
        }
    }

    /// Indicates whether this [`Session`] still accepts transitions.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    /// Indicates whether the payable window of this [`Session`] is over,
    /// whatever its [`Status`] is.
    #[must_use]
    pub fn is_overdue(&self) -> bool {
        self.expires_at.coerce::<()>() <= DateTime::now()
    }

    /// Applies the provided [`Patch`] to this [`Session`], stamping its
    /// modification [`DateTime`].
    ///
    /// Legality of the transition is not checked here.
    pub fn apply(&mut self, patch: Patch) {
        let Patch {
            status,
            transaction_id,
            error_reason,
        } = patch;

        self.status = status;
        if transaction_id.is_some() {
            self.transaction_id = transaction_id;
        }
        if error_reason.is_some() {
            self.error_reason = error_reason;
        }
        self.updated_at = DateTime::now().coerce();
    }
}

/// ID of a [`Session`].
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Into,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    /// Length of the textual representation of an [`Id`].
    pub const LENGTH: usize = 36;

    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the canonical hyphenated form is accepted, so it never gets
        // confused with a `ShortCode`.
        if s.len() != Self::LENGTH {
            return Err("invalid `session::Id`");
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| "invalid `session::Id`")
    }
}

/// Short human-typable alias of a [`Session`].
///
/// Always stored in upper case.
#[derive(
    AsRef, Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[as_ref(forward)]
pub struct ShortCode(String);

impl ShortCode {
    /// Alphabet of a [`ShortCode`], omitting visually ambiguous glyphs
    /// (`0`/`O`, `1`/`I`).
    pub const ALPHABET: &'static [u8; 32] =
        b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Number of characters in a [`ShortCode`].
    pub const LENGTH: usize = 6;

    /// Generates a new random [`ShortCode`].
    ///
    /// Uniqueness is not checked here.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self(
            (0..Self::LENGTH)
                .map(|_| {
                    let i = rng.gen_range(0..Self::ALPHABET.len());
                    char::from(Self::ALPHABET[i])
                })
                .collect(),
        )
    }

    /// Creates a new [`ShortCode`] out of the provided `code` ignoring its
    /// case, if it's a valid one.
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Option<Self> {
        let code = code.as_ref().to_ascii_uppercase();
        Self::check(&code).then_some(Self(code))
    }

    /// Checks whether the given upper-cased `code` is a valid [`ShortCode`].
    fn check(code: &str) -> bool {
        code.len() == Self::LENGTH
            && code.bytes().all(|b| Self::ALPHABET.contains(&b))
    }
}

impl FromStr for ShortCode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `ShortCode`")
    }
}

/// Identifier resolving a [`Session`] either by its [`Id`] or by its
/// [`ShortCode`].
///
/// Which one is determined by the shape of the textual representation.
#[derive(Clone, Debug, Display, Eq, From, Hash, PartialEq)]
pub enum Identifier {
    /// [`Session`] is identified by its [`Id`].
    Id(Id),

    /// [`Session`] is identified by its [`ShortCode`].
    ShortCode(ShortCode),
}

impl FromStr for Identifier {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.len() {
            Id::LENGTH => s.parse().map(Self::Id),
            ShortCode::LENGTH => s.parse().map(Self::ShortCode),
            _ => Err("neither a `session::Id` nor a `ShortCode`"),
        }
    }
}

/// Single line of a synchronized cart.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// [`ProductId`] this line refers to.
    pub product_id: ProductId,

    /// Number of product units.
    #[serde(alias = "qty")]
    pub quantity: NonZeroU32,

    /// Price of a single product unit.
    pub price: Money,
}

impl LineItem {
    /// Returns the price of this whole line, if it doesn't overflow.
    #[must_use]
    pub fn subtotal(&self) -> Option<Money> {
        self.price.checked_times(self.quantity.get())
    }
}

/// Sums up the provided cart [`LineItem`]s.
///
/// [`None`] is returned if the sum doesn't fit into [`Money`].
#[must_use]
pub fn total(items: &[LineItem]) -> Option<Money> {
    items
        .iter()
        .map(LineItem::subtotal)
        .try_fold(Money::ZERO, |sum, line| sum.checked_add(line?))
}

/// Reference to a product in the inventory.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[as_ref(forward)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new [`ProductId`] if the given `id` is valid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        Self::check(&id).then_some(Self(id))
    }

    /// Checks whether the given `id` is a valid [`ProductId`].
    fn check(id: impl AsRef<str>) -> bool {
        let id = id.as_ref();
        id.trim() == id && !id.is_empty() && id.len() <= 128
    }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw.clone()).ok_or_else(|| {
            serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(&raw),
                &"non-empty trimmed product reference",
            )
        })
    }
}

define_kind! {
    #[doc = "Status of a [`Session`]."]
    enum Status {
        #[doc = "Waiting for a payment."]
        Pending = 1,

        #[doc = "Paid successfully."]
        Paid = 2,

        #[doc = "Not paid in time."]
        Expired = 3,

        #[doc = "Payment attempt has failed."]
        Failed = 4,
    }
}

impl Status {
    /// Indicates whether this [`Status`] accepts no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Human-readable reason of a [`Status::Failed`] [`Session`].
#[derive(
    AsRef, Clone, Debug, Deserialize, Display, Eq, From, PartialEq, Serialize,
)]
#[as_ref(forward)]
pub struct ErrorReason(String);

impl From<&str> for ErrorReason {
    fn from(reason: &str) -> Self {
        Self(reason.to_owned())
    }
}

/// Changes to be applied to a [`Session`] along with its [`Status`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Patch {
    /// New [`Status`] of the [`Session`].
    pub status: Status,

    /// ID of the paying [`transaction`] to be recorded.
    pub transaction_id: Option<transaction::Id>,

    /// [`ErrorReason`] to be recorded.
    pub error_reason: Option<ErrorReason>,
}

impl Patch {
    /// Creates a new [`Patch`] changing the [`Status`] only.
    #[must_use]
    pub fn status(status: Status) -> Self {
        Self {
            status,
            transaction_id: None,
            error_reason: None,
        }
    }
}

/// Status transition of a [`Status::Pending`] [`Session`] requested by
/// anyone but the payment claimant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    /// [`Identifier`] of the [`Session`] to transition.
    pub by: Identifier,

    /// [`Patch`] to apply.
    pub patch: Patch,
}

/// Outcome of a payment, written by the payment claimant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settlement {
    /// ID of the paid [`Session`].
    pub session_id: Id,

    /// Outcome of the payment.
    pub outcome: Outcome,
}

/// Outcome of a payment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Payment succeeded with the provided [`transaction::Id`].
    Paid(transaction::Id),

    /// Payment failed for the provided [`ErrorReason`].
    Failed(ErrorReason),
}

impl From<Outcome> for Patch {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Paid(id) => Self {
                status: Status::Paid,
                transaction_id: Some(id),
                error_reason: None,
            },
            Outcome::Failed(reason) => Self {
                status: Status::Failed,
                transaction_id: None,
                error_reason: Some(reason),
            },
        }
    }
}

/// Result of a requested [`Transition`] or [`Settlement`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transitioned {
    /// Transition was applied, resulting in the provided [`Session`].
    Applied(Session),

    /// [`Session`] is not [`Status::Pending`] anymore.
    Rejected(Status),

    /// [`Session`] is being paid at the moment.
    Busy,

    /// [`Session`] does not exist.
    Missing,
}

impl fmt::Display for Transitioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied(s) => write!(f, "applied, now `{}`", s.status),
            Self::Rejected(st) => write!(f, "rejected, already `{st}`"),
            Self::Busy => f.write_str("rejected, payment in progress"),
            Self::Missing => f.write_str("session is missing"),
        }
    }
}

/// [`DateTime`] when a [`Session`] was created.
pub type CreationDateTime = DateTimeOf<(Session, unit::Creation)>;

/// [`DateTime`] when a [`Session`] was last mutated.
pub type ModificationDateTime = DateTimeOf<(Session, unit::Modification)>;

/// [`DateTime`] when a [`Session`] stops being payable.
pub type ExpirationDateTime = DateTimeOf<(Session, unit::Expiration)>;
