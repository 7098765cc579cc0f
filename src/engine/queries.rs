use std::cmp::Reverse;

use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::format::is_valid_price_range;
use crate::limits::*;
use crate::model::*;

use super::availability::{self, compute_blocked_intervals, free_ranges, is_proposal_admissible, merge_blocked};
use super::conflict::{check_text, validate_window};
use super::{Engine, EngineError};

fn matches_filter(ls: &ListingState, filter: &ListingFilter) -> Result<bool, EngineError> {
    let l = &ls.listing;
    let attributes = filter.purpose.is_none_or(|p| l.purpose == p)
        && filter.kind.is_none_or(|k| l.kind == k)
        && filter.status.is_none_or(|s| l.status == s)
        && filter
            .city
            .as_ref()
            .is_none_or(|c| l.city.to_lowercase().contains(&c.to_lowercase()))
        && filter.min_price.is_none_or(|p| l.price >= p)
        && filter.max_price.is_none_or(|p| l.price <= p)
        && filter.min_area.is_none_or(|a| l.area_m2.is_some_and(|v| v >= a))
        && filter.max_area.is_none_or(|a| l.area_m2.is_some_and(|v| v <= a))
        && filter.bedrooms.is_none_or(|b| l.bedrooms == Some(b))
        && filter.bathrooms.is_none_or(|b| l.bathrooms == Some(b))
        && filter.q.as_deref().is_none_or(|q| l.mentions(q));
    if !attributes {
        return Ok(false);
    }
    match &filter.available {
        Some(range) => is_proposal_admissible(ls.reservations_starting_by(range.end), range.start, range.end),
        None => Ok(true),
    }
}

fn validate_filter(filter: &ListingFilter) -> Result<(), EngineError> {
    let min = filter.min_price.unwrap_or(0);
    let max = filter.max_price.unwrap_or(i64::MAX);
    if !is_valid_price_range(min, max) {
        return Err(EngineError::InvalidInput("invalid price range"));
    }
    if let (Some(min), Some(max)) = (filter.min_area, filter.max_area)
        && min > max
    {
        return Err(EngineError::InvalidInput("invalid area range"));
    }
    if filter.page == 0 || filter.per_page == 0 {
        return Err(EngineError::InvalidInput("page and per_page start at 1"));
    }
    if filter.per_page > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page too large"));
    }
    if let Some(q) = &filter.q {
        check_text(q, MAX_SEARCH_LEN, "search term too long")?;
    }
    if let Some(range) = &filter.available {
        validate_window(range)?;
    }
    Ok(())
}

impl Engine {
    pub async fn get_listing(&self, id: Ulid) -> Result<Listing, EngineError> {
        let guard = self.read_listing(&id).await?;
        Ok(guard.listing.clone())
    }

    pub async fn get_listing_by_slug(&self, slug: &str) -> Option<Listing> {
        let id = *self.slugs.get(slug)?.value();
        self.get_listing(id).await.ok()
    }

    /// Catalog search: filter, sort, then cut one page.
    pub async fn list_listings(&self, filter: &ListingFilter) -> Result<Page<Listing>, EngineError> {
        validate_filter(filter)?;

        let mut hits = Vec::new();
        for ls in self.listing_handles() {
            let guard = ls.read().await;
            if !guard.deleted && matches_filter(&guard, filter)? {
                hits.push(guard.listing.clone());
            }
        }

        match filter.sort {
            SortOrder::PriceAsc => hits.sort_by_key(|l| (l.price, l.id)),
            SortOrder::PriceDesc => hits.sort_by_key(|l| (Reverse(l.price), l.id)),
            SortOrder::DateAsc => hits.sort_by_key(|l| (l.created_at, l.id)),
            SortOrder::DateDesc => hits.sort_by_key(|l| Reverse((l.created_at, l.id))),
        }
        Ok(Page::slice(hits, filter.page, filter.per_page))
    }

    /// Reservations of a listing in start-date order.
    pub async fn reservations(
        &self,
        listing_id: Ulid,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.read_listing(&listing_id).await?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let listing_id = self.get_listing_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let guard = self.read_listing(&listing_id).await.map_err(|_| EngineError::NotFound(id))?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations across every listing, newest request first.
    pub async fn all_reservations(&self, status: Option<ReservationStatus>) -> Vec<Reservation> {
        let mut all = Vec::new();
        for ls in self.listing_handles() {
            let guard = ls.read().await;
            if guard.deleted {
                continue;
            }
            all.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| status.is_none_or(|s| r.status == s))
                    .cloned(),
            );
        }
        all.sort_by_key(|r| Reverse((r.created_at, r.id)));
        all
    }

    pub async fn visits(&self, listing_id: Ulid, status: Option<VisitStatus>) -> Result<Vec<Visit>, EngineError> {
        let guard = self.read_listing(&listing_id).await?;
        Ok(guard
            .visits
            .iter()
            .filter(|v| status.is_none_or(|s| v.status == s))
            .cloned()
            .collect())
    }

    /// Visits across every listing in schedule order. `period` splits them
    /// at `now`.
    pub async fn all_visits(
        &self,
        status: Option<VisitStatus>,
        period: Option<VisitPeriod>,
        now: NaiveDateTime,
    ) -> Vec<Visit> {
        let mut all = Vec::new();
        for ls in self.listing_handles() {
            let guard = ls.read().await;
            if guard.deleted {
                continue;
            }
            all.extend(
                guard
                    .visits
                    .iter()
                    .filter(|v| status.is_none_or(|s| v.status == s))
                    .filter(|v| period.is_none_or(|p| p.includes(v.scheduled_at, now)))
                    .cloned(),
            );
        }
        all.sort_by_key(|v| (v.scheduled_at, v.id));
        all
    }

    pub async fn stats(&self, now: NaiveDateTime) -> DashboardStats {
        let mut stats = DashboardStats::default();
        for ls in self.listing_handles() {
            let guard = ls.read().await;
            if guard.deleted {
                continue;
            }
            stats.total_listings += 1;
            if guard.listing.status == ListingStatus::Publie {
                stats.published_listings += 1;
            }
            stats.pending_reservations += guard
                .reservations
                .iter()
                .filter(|r| r.status == ReservationStatus::Pending)
                .count();
            stats.upcoming_visits += guard
                .visits
                .iter()
                .filter(|v| v.status == VisitStatus::Pending && v.scheduled_at >= now)
                .count();
        }
        stats
    }

    /// Unavailable date ranges for calendar display, unmerged.
    pub async fn blocked_intervals(&self, listing_id: Ulid) -> Result<Vec<DateRange>, EngineError> {
        let guard = self.read_listing(&listing_id).await?;
        Ok(compute_blocked_intervals(&guard.reservations).collect())
    }

    pub async fn is_date_blocked(&self, listing_id: Ulid, day: Day) -> Result<bool, EngineError> {
        let guard = self.read_listing(&listing_id).await?;
        Ok(availability::is_date_blocked(day, guard.reservations_starting_by(day)))
    }

    /// Advisory check. Admission re-checks under the write lock.
    pub async fn is_admissible(&self, listing_id: Ulid, start: Day, end: Day) -> Result<bool, EngineError> {
        let guard = self.read_listing(&listing_id).await?;
        is_proposal_admissible(guard.reservations_starting_by(end), start, end)
    }

    /// Maximal free windows inside `[start, end]`.
    pub async fn free_dates(&self, listing_id: Ulid, start: Day, end: Day) -> Result<Vec<DateRange>, EngineError> {
        let window = DateRange::new(start, end)?;
        validate_window(&window)?;
        let guard = self.read_listing(&listing_id).await?;
        let blocked = merge_blocked(compute_blocked_intervals(guard.reservations_starting_by(end)));
        Ok(free_ranges(window, &blocked))
    }
}
