use chrono::Datelike;

use crate::limits::*;
use crate::model::*;

use super::availability::find_conflict;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_stay(range: &DateRange) -> Result<(), EngineError> {
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(range: &DateRange) -> Result<(), EngineError> {
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Only reservations starting on or before `range.end` can overlap it, so the
/// scan is limited to that prefix of the sorted list.
pub(crate) fn check_no_conflict(ls: &ListingState, range: &DateRange) -> Result<(), EngineError> {
    let candidates = ls.reservations_starting_by(range.end);
    match find_conflict(candidates, range.start, range.end)? {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

pub(crate) fn check_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Contact fields are bounded; a reservation or visit needs an email.
pub(crate) fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    let Some(email) = contact.email.as_deref().map(str::trim) else {
        return Err(EngineError::InvalidInput("contact email is required"));
    };
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::InvalidInput("contact email is invalid"));
    }
    for field in [&contact.name, &contact.email, &contact.phone].into_iter().flatten() {
        check_text(field, MAX_CONTACT_LEN, "contact field too long")?;
    }
    Ok(())
}
