use ulid::Ulid;

use crate::model::{InvalidRange, ListingStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidRange(InvalidRange),
    /// An existing blocking reservation occupies part of the requested range.
    Conflict(Ulid),
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    NotBookable {
        listing_id: Ulid,
        reason: NotBookableReason,
    },
    HasActiveReservations(Ulid),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotBookableReason {
    NotForRent,
    NotPublished(ListingStatus),
}

impl std::fmt::Display for NotBookableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotBookableReason::NotForRent => f.write_str("listing is not a rental"),
            NotBookableReason::NotPublished(status) => {
                write!(f, "listing is not published (status {status})")
            }
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange(e) => write!(f, "{e}"),
            EngineError::Conflict(id) => {
                write!(f, "these dates are not available (reservation {id})")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "cannot move {id} from {from} to {to}")
            }
            EngineError::NotBookable { listing_id, reason } => {
                write!(f, "listing {listing_id} cannot be booked: {reason}")
            }
            EngineError::HasActiveReservations(id) => {
                write!(f, "cannot delete listing {id}: has active reservations")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::InvalidRange(e)
    }
}
