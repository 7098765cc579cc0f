use std::sync::Arc;

use chrono::Datelike;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::format::{default_visit_slot, DEFAULT_CURRENCY};
use crate::limits::*;
use crate::model::*;
use crate::observability::{
    LISTINGS_ACTIVE, RESERVATIONS_ADMITTED_TOTAL, RESERVATIONS_REJECTED_TOTAL, WAL_COMPACTIONS_TOTAL,
};
use crate::slug::{slug_base, slug_candidates};

use super::conflict::{check_no_conflict, check_text, now_ms, validate_contact, validate_stay};
use super::{Engine, EngineError, NotBookableReason, WalCommand};

pub const DEFAULT_CITY: &str = "Bizerte";
pub const DEFAULT_VISIT_NOTES: &str = "Demande de visite depuis le site web";

/// Events that recreate one listing as it stands now.
fn snapshot_events(ls: &ListingState, events: &mut Vec<Event>) {
    events.push(Event::listing_created(&ls.listing));
    for r in &ls.reservations {
        events.push(Event::ReservationRequested {
            id: r.id,
            listing_id: r.listing_id,
            range: r.range,
            contact: r.contact.clone(),
            notes: r.notes.clone(),
            created_at: r.created_at,
        });
        if r.status != ReservationStatus::Pending {
            events.push(Event::ReservationStatusChanged {
                id: r.id,
                listing_id: r.listing_id,
                status: r.status,
            });
        }
    }
    for v in &ls.visits {
        events.push(Event::VisitRequested {
            id: v.id,
            listing_id: v.listing_id,
            scheduled_at: v.scheduled_at,
            duration_min: v.duration_min,
            contact: v.contact.clone(),
            notes: v.notes.clone(),
            created_at: v.created_at,
        });
        if v.status != VisitStatus::Pending {
            events.push(Event::VisitStatusChanged {
                id: v.id,
                listing_id: v.listing_id,
                status: v.status,
            });
        }
    }
}

fn check_optional(text: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match text {
        Some(t) => check_text(t, max, what),
        None => Ok(()),
    }
}

fn check_notes(notes: &Option<String>) -> Result<(), EngineError> {
    check_optional(notes, MAX_NOTES_LEN, "notes too long")
}

/// Trimmed, with blank text treated as absent.
fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn reject(reason: &'static str) {
    metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

impl Engine {
    // ── Listings ─────────────────────────────────────────────

    pub async fn create_listing(&self, id: Ulid, new: NewListing) -> Result<Listing, EngineError> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::InvalidInput("title is required"));
        }
        check_text(&title, MAX_TITLE_LEN, "title too long")?;
        if new.price <= 0 {
            return Err(EngineError::InvalidInput("price must be positive"));
        }
        let currency = new.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        check_text(&currency, MAX_CURRENCY_LEN, "currency too long")?;
        let city = new.city.unwrap_or_else(|| DEFAULT_CITY.to_string());
        check_text(&city, MAX_CITY_LEN, "city too long")?;
        let description = non_blank(new.description);
        check_optional(&description, MAX_DESCRIPTION_LEN, "description too long")?;
        let address = non_blank(new.address);
        check_optional(&address, MAX_ADDRESS_LEN, "address too long")?;
        if let Some(year) = new.year_built
            && !(MIN_YEAR_BUILT..=MAX_VALID_YEAR).contains(&year)
        {
            return Err(EngineError::InvalidInput("year_built out of range"));
        }

        let _commit = self.commit_gate.read().await;
        if self.state.len() >= MAX_LISTINGS {
            return Err(EngineError::LimitExceeded("too many listings"));
        }

        // Claim the slug in the same step as the uniqueness check.
        let base = slug_base(&title);
        let slug = slug_candidates(&base)
            .find(|candidate| match self.slugs.entry(candidate.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(id);
                    true
                }
                Entry::Occupied(_) => false,
            })
            .ok_or(EngineError::LimitExceeded("no free slug"))?;

        let listing = Listing {
            id,
            slug,
            title,
            description,
            purpose: new.purpose,
            kind: new.kind,
            price: new.price,
            currency,
            city,
            address,
            area_m2: new.area_m2,
            bedrooms: new.bedrooms,
            bathrooms: new.bathrooms,
            year_built: new.year_built,
            status: new.status.unwrap_or(ListingStatus::Brouillon),
            created_at: now_ms(),
        };

        // The id is claimed with the listing already locked, so nobody reads
        // or writes it before the WAL has it.
        let shared = Arc::new(RwLock::new(ListingState::new(listing.clone())));
        let mut guard = shared.clone().write_owned().await;
        match self.state.entry(id) {
            Entry::Occupied(_) => {
                self.slugs.remove(&listing.slug);
                return Err(EngineError::AlreadyExists(id));
            }
            Entry::Vacant(entry) => {
                entry.insert(shared);
            }
        }

        let event = Event::listing_created(&listing);
        if let Err(e) = self.wal_append(&event).await {
            self.forget_listing(&mut guard);
            return Err(e);
        }
        metrics::gauge!(LISTINGS_ACTIVE).set(self.state.len() as f64);
        self.notify.send(id, &event);
        info!("listing {id} created as {:?}", listing.slug);
        Ok(listing)
    }

    /// Admin action: any status may follow any other.
    pub async fn set_listing_status(&self, id: Ulid, status: ListingStatus) -> Result<Listing, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_listing(&id).await?;
        let event = Event::ListingStatusChanged { id, status };
        self.persist_and_apply(id, &mut guard, &event).await?;
        debug!("listing {id} is now {status}");
        Ok(guard.listing.clone())
    }

    /// Refused while any pending or confirmed reservation remains.
    pub async fn delete_listing(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_listing(&id).await?;
        if guard.has_blocking_reservations() {
            return Err(EngineError::HasActiveReservations(id));
        }

        let event = Event::ListingDeleted { id };
        self.wal_append(&event).await?;
        self.forget_listing(&mut guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!("listing {id} deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Admit a proposed stay as a pending reservation. The conflict check and
    /// the append happen under the listing's write lock, so two overlapping
    /// requests cannot both get in.
    pub async fn request_reservation(&self, id: Ulid, req: ReservationRequest) -> Result<Reservation, EngineError> {
        let range = DateRange::new(req.start_date, req.end_date)?;
        validate_stay(&range)?;
        validate_contact(&req.contact)?;
        check_notes(&req.notes)?;

        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_listing(&req.listing_id).await?;
        if self.entity_to_listing.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.listing.purpose != ListingPurpose::Location {
            reject("not_bookable");
            return Err(EngineError::NotBookable {
                listing_id: req.listing_id,
                reason: NotBookableReason::NotForRent,
            });
        }
        if guard.listing.status != ListingStatus::Publie {
            reject("not_bookable");
            return Err(EngineError::NotBookable {
                listing_id: req.listing_id,
                reason: NotBookableReason::NotPublished(guard.listing.status),
            });
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many reservations on listing"));
        }

        if let Err(e) = check_no_conflict(&guard, &range) {
            reject("conflict");
            info!("reservation {id} on {} rejected for {range}: {e}", req.listing_id);
            return Err(e);
        }

        let event = Event::ReservationRequested {
            id,
            listing_id: req.listing_id,
            range,
            contact: req.contact,
            notes: req.notes,
            created_at: now_ms(),
        };
        self.claim_entity(id, req.listing_id)?;
        if let Err(e) = self.persist_and_apply(req.listing_id, &mut guard, &event).await {
            self.entity_to_listing.remove(&id);
            return Err(e);
        }
        metrics::counter!(RESERVATIONS_ADMITTED_TOTAL).increment(1);
        info!("reservation {id} on {} admitted for {range}", req.listing_id);
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn set_reservation_status(&self, id: Ulid, status: ReservationStatus) -> Result<Reservation, EngineError> {
        let _commit = self.commit_gate.read().await;
        let (listing_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?.status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.as_str(),
                to: status.as_str(),
            });
        }

        let event = Event::ReservationStatusChanged { id, listing_id, status };
        self.persist_and_apply(listing_id, &mut guard, &event).await?;
        info!("reservation {id} {current} -> {status}");
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.set_reservation_status(id, ReservationStatus::Confirmed).await
    }

    /// Frees the dates for later requests.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.set_reservation_status(id, ReservationStatus::Cancelled).await
    }

    // ── Visits ───────────────────────────────────────────────

    pub async fn request_visit(&self, id: Ulid, req: VisitRequest) -> Result<Visit, EngineError> {
        validate_contact(&req.contact)?;
        let notes = req.notes.or_else(|| Some(DEFAULT_VISIT_NOTES.to_string()));
        check_notes(&notes)?;
        let duration_min = req.duration_min.unwrap_or(DEFAULT_VISIT_DURATION_MIN);
        if duration_min == 0 {
            return Err(EngineError::InvalidInput("visit duration must be positive"));
        }
        if duration_min > MAX_VISIT_DURATION_MIN {
            return Err(EngineError::LimitExceeded("visit too long"));
        }
        let scheduled_at = req
            .scheduled_at
            .unwrap_or_else(|| default_visit_slot(chrono::Utc::now().date_naive()));
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&scheduled_at.year()) {
            return Err(EngineError::LimitExceeded("date out of range"));
        }

        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_listing(&req.listing_id).await?;
        if self.entity_to_listing.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.listing.status != ListingStatus::Publie {
            return Err(EngineError::NotBookable {
                listing_id: req.listing_id,
                reason: NotBookableReason::NotPublished(guard.listing.status),
            });
        }
        if guard.visits.len() >= MAX_VISITS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many visits on listing"));
        }

        let event = Event::VisitRequested {
            id,
            listing_id: req.listing_id,
            scheduled_at,
            duration_min,
            contact: req.contact,
            notes,
            created_at: now_ms(),
        };
        self.claim_entity(id, req.listing_id)?;
        if let Err(e) = self.persist_and_apply(req.listing_id, &mut guard, &event).await {
            self.entity_to_listing.remove(&id);
            return Err(e);
        }
        info!("visit {id} on {} requested for {scheduled_at}", req.listing_id);
        guard.visit(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn set_visit_status(&self, id: Ulid, status: VisitStatus) -> Result<Visit, EngineError> {
        let _commit = self.commit_gate.read().await;
        let (listing_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.visit(id).ok_or(EngineError::NotFound(id))?.status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.as_str(),
                to: status.as_str(),
            });
        }

        let event = Event::VisitStatusChanged { id, listing_id, status };
        self.persist_and_apply(listing_id, &mut guard, &event).await?;
        guard.visit(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel_visit(&self, id: Ulid) -> Result<Visit, EngineError> {
        self.set_visit_status(id, VisitStatus::Cancelled).await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _commit = self.commit_gate.write().await;

        let mut events = Vec::new();
        for ls in self.listing_handles() {
            let guard = ls.read().await;
            if !guard.deleted {
                snapshot_events(&guard, &mut events);
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
