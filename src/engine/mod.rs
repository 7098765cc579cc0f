mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    compute_blocked_intervals, find_conflict, free_ranges, intervals_overlap, is_date_blocked,
    is_proposal_admissible, merge_blocked,
};
pub use error::{EngineError, NotBookableReason};
pub use mutations::{DEFAULT_CITY, DEFAULT_VISIT_NOTES};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{LISTINGS_ACTIVE, WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedListingState = Arc<RwLock<ListingState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        // Compaction must see every append that was queued before it.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes do not leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The reservation store: every listing with its reservations and visits,
/// rebuilt from the WAL on start.
pub struct Engine {
    pub state: DashMap<Ulid, SharedListingState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation/visit id → listing id
    pub(super) entity_to_listing: DashMap<Ulid, Ulid>,
    /// Slug → listing id. Holds every slug in use.
    pub(super) slugs: DashMap<String, Ulid>,
    /// Writers hold this shared; compaction holds it exclusively so its
    /// snapshot and the WAL rewrite see the same history.
    pub(super) commit_gate: RwLock<()>,
}

fn listing_from_created(event: &Event) -> Option<Listing> {
    match event {
        Event::ListingCreated {
            id,
            slug,
            title,
            description,
            purpose,
            kind,
            price,
            currency,
            city,
            address,
            area_m2,
            bedrooms,
            bathrooms,
            year_built,
            status,
            created_at,
        } => Some(Listing {
            id: *id,
            slug: slug.clone(),
            title: title.clone(),
            description: description.clone(),
            purpose: *purpose,
            kind: *kind,
            price: *price,
            currency: currency.clone(),
            city: city.clone(),
            address: address.clone(),
            area_m2: *area_m2,
            bedrooms: *bedrooms,
            bathrooms: *bathrooms,
            year_built: *year_built,
            status: *status,
            created_at: *created_at,
        }),
        _ => None,
    }
}

/// Apply an event directly to a ListingState (no locking — caller holds the lock).
fn apply_to_listing(ls: &mut ListingState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ListingStatusChanged { status, .. } => {
            ls.listing.status = *status;
        }
        Event::ReservationRequested {
            id,
            listing_id,
            range,
            contact,
            notes,
            created_at,
        } => {
            ls.insert_reservation(Reservation {
                id: *id,
                listing_id: *listing_id,
                range: *range,
                status: ReservationStatus::Pending,
                contact: contact.clone(),
                notes: notes.clone(),
                created_at: *created_at,
            });
            entity_map.insert(*id, *listing_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = ls.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::VisitRequested {
            id,
            listing_id,
            scheduled_at,
            duration_min,
            contact,
            notes,
            created_at,
        } => {
            ls.insert_visit(Visit {
                id: *id,
                listing_id: *listing_id,
                scheduled_at: *scheduled_at,
                duration_min: *duration_min,
                status: VisitStatus::Pending,
                contact: contact.clone(),
                notes: notes.clone(),
                created_at: *created_at,
            });
            entity_map.insert(*id, *listing_id);
        }
        Event::VisitStatusChanged { id, status, .. } => {
            if let Some(v) = ls.visit_mut(*id) {
                v.status = *status;
            }
        }
        // ListingCreated/Deleted are handled at the DashMap level, not here
        Event::ListingCreated { .. } | Event::ListingDeleted { .. } => {}
    }
}

fn unmap_children(ls: &ListingState, entity_map: &DashMap<Ulid, Ulid>) {
    for r in &ls.reservations {
        entity_map.remove(&r.id);
    }
    for v in &ls.visits {
        entity_map.remove(&v.id);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_listing = DashMap::new();

        // Rebuild into plain values first; nothing else can see them yet.
        let mut listings: HashMap<Ulid, ListingState> = HashMap::new();
        for event in &events {
            match event {
                Event::ListingCreated { .. } => {
                    if let Some(listing) = listing_from_created(event) {
                        listings.insert(listing.id, ListingState::new(listing));
                    }
                }
                Event::ListingDeleted { id } => {
                    if let Some(ls) = listings.remove(id) {
                        unmap_children(&ls, &entity_to_listing);
                    }
                }
                other => {
                    if let Some(ls) = listings.get_mut(&other.listing_id()) {
                        apply_to_listing(ls, other, &entity_to_listing);
                    }
                }
            }
        }

        let state = DashMap::with_capacity(listings.len());
        let slugs = DashMap::with_capacity(listings.len());
        for (id, ls) in listings {
            slugs.insert(ls.listing.slug.clone(), id);
            state.insert(id, Arc::new(RwLock::new(ls)));
        }
        info!("replayed {} events into {} listings", events.len(), state.len());
        metrics::gauge!(LISTINGS_ACTIVE).set(state.len() as f64);

        Ok(Self {
            state,
            wal_tx,
            notify,
            entity_to_listing,
            slugs,
            commit_gate: RwLock::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_listing_state(&self, id: &Ulid) -> Option<SharedListingState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_listing_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_listing.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn require_listing(&self, id: &Ulid) -> Result<SharedListingState, EngineError> {
        self.get_listing_state(id).ok_or(EngineError::NotFound(*id))
    }

    /// Write lock on a listing that is still live once the lock is held.
    pub(super) async fn lock_listing(&self, id: &Ulid) -> Result<OwnedRwLockWriteGuard<ListingState>, EngineError> {
        let guard = self.require_listing(id)?.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    pub(super) async fn read_listing(&self, id: &Ulid) -> Result<OwnedRwLockReadGuard<ListingState>, EngineError> {
        let guard = self.require_listing(id)?.read_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Every listing handle, cloned out so no shard lock is held across awaits.
    pub(super) fn listing_handles(&self) -> Vec<SharedListingState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// Reserve a reservation/visit id for `listing_id`. Ids are unique across
    /// every listing.
    pub(super) fn claim_entity(&self, id: Ulid, listing_id: Ulid) -> Result<(), EngineError> {
        match self.entity_to_listing.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(entry) => {
                entry.insert(listing_id);
                Ok(())
            }
        }
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        listing_id: Ulid,
        ls: &mut ListingState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_listing(ls, event, &self.entity_to_listing);
        self.notify.send(listing_id, event);
        Ok(())
    }

    /// Lookup entity → listing, get listing, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ListingState>), EngineError> {
        let listing_id = self
            .get_listing_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.lock_listing(&listing_id).await.map_err(|_| EngineError::NotFound(*entity_id))?;
        Ok((listing_id, guard))
    }

    /// Drop a listing from every index and mark it so stale handles see it gone.
    pub(super) fn forget_listing(&self, ls: &mut ListingState) {
        ls.deleted = true;
        unmap_children(ls, &self.entity_to_listing);
        self.slugs.remove(&ls.listing.slug);
        self.state.remove(&ls.listing.id);
        metrics::gauge!(LISTINGS_ACTIVE).set(self.state.len() as f64);
    }
}
