use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// A calendar date. No time-of-day, no timezone.
pub type Day = NaiveDate;

/// Boundary format for dates: `YYYY-MM-DD`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_day(s: &str) -> Result<Day, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

/// Accepts `YYYY-MM-DDTHH:MM[:SS]` and the space-separated variant.
pub fn parse_date_time(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
}

// ── Date ranges ──────────────────────────────────────────────────

/// Closed interval `[start, end]` of calendar days. Both ends are occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(rename = "start_date")]
    pub start: Day,
    #[serde(rename = "end_date")]
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Closed-interval intersection: sharing a boundary day counts.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// A range whose end precedes its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: Day,
    pub end: Day,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid range: end {} is before start {}",
            self.end.format(DATE_FORMAT),
            self.start.format(DATE_FORMAT)
        )
    }
}

impl std::error::Error for InvalidRange {}

// ── Text-backed enums ────────────────────────────────────────────

/// A status/kind string that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares an enum stored and exchanged as lowercase text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $label, value: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Reservation lifecycle: `pending → confirmed | cancelled`, both terminal.
    ReservationStatus, "reservation status" {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
    }
);

impl ReservationStatus {
    /// Pending and confirmed reservations occupy the calendar.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Pending, ReservationStatus::Cancelled)
        )
    }
}

text_enum!(
    VisitStatus, "visit status" {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Completed => "completed",
    }
);

impl VisitStatus {
    pub fn can_transition_to(&self, next: VisitStatus) -> bool {
        matches!(
            (self, next),
            (VisitStatus::Pending, VisitStatus::Confirmed)
                | (VisitStatus::Pending, VisitStatus::Cancelled)
                | (VisitStatus::Confirmed, VisitStatus::Completed)
                | (VisitStatus::Confirmed, VisitStatus::Cancelled)
        )
    }
}

text_enum!(
    /// Sale or rental.
    ListingPurpose, "listing purpose" {
        Vente => "vente",
        Location => "location",
    }
);

text_enum!(
    PropertyKind, "property kind" {
        Appartement => "appartement",
        Villa => "villa",
        Studio => "studio",
        Terrain => "terrain",
        Bureau => "bureau",
        Autre => "autre",
    }
);

text_enum!(
    ListingStatus, "listing status" {
        Brouillon => "brouillon",
        Publie => "publie",
        Reserve => "reserve",
        Occupe => "occupe",
        Vendu => "vendu",
        Retire => "retire",
    }
);

// ── Stored periods ───────────────────────────────────────────────

/// A stored period whose dates could not be turned into a valid range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPeriod {
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
}

impl fmt::Display for MalformedPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed stored period {:?}..{:?}: {}",
            self.start_date, self.end_date, self.reason
        )
    }
}

impl std::error::Error for MalformedPeriod {}

/// Anything the availability functions can read a status and a date range from.
pub trait StoredPeriod {
    fn status(&self) -> ReservationStatus;
    fn date_range(&self) -> Result<DateRange, MalformedPeriod>;
}

impl<T: StoredPeriod + ?Sized> StoredPeriod for &T {
    fn status(&self) -> ReservationStatus {
        (**self).status()
    }

    fn date_range(&self) -> Result<DateRange, MalformedPeriod> {
        (**self).date_range()
    }
}

/// A reservation as read back from storage, dates still in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookablePeriod {
    pub start_date: String,
    pub end_date: String,
    pub status: ReservationStatus,
}

impl BookablePeriod {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>, status: ReservationStatus) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            status,
        }
    }
}

impl StoredPeriod for BookablePeriod {
    fn status(&self) -> ReservationStatus {
        self.status
    }

    fn date_range(&self) -> Result<DateRange, MalformedPeriod> {
        let malformed = |reason: String| MalformedPeriod {
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            reason,
        };
        let start = parse_day(&self.start_date).map_err(|e| malformed(format!("start_date: {e}")))?;
        let end = parse_day(&self.end_date).map_err(|e| malformed(format!("end_date: {e}")))?;
        DateRange::new(start, end).map_err(|e| malformed(e.to_string()))
    }
}

// ── Store records ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub purpose: ListingPurpose,
    pub kind: PropertyKind,
    /// Whole currency units.
    pub price: i64,
    pub currency: String,
    pub city: String,
    pub address: Option<String>,
    pub area_m2: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub year_built: Option<i32>,
    pub status: ListingStatus,
    pub created_at: Ms,
}

impl Listing {
    /// Only published rentals take reservation requests.
    pub fn accepts_reservations(&self) -> bool {
        self.purpose == ListingPurpose::Location && self.status == ListingStatus::Publie
    }

    /// Case-insensitive substring match on title or city.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle) || self.city.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub listing_id: Ulid,
    #[serde(flatten)]
    pub range: DateRange,
    pub status: ReservationStatus,
    pub contact: Contact,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl StoredPeriod for Reservation {
    fn status(&self) -> ReservationStatus {
        self.status
    }

    fn date_range(&self) -> Result<DateRange, MalformedPeriod> {
        Ok(self.range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub scheduled_at: NaiveDateTime,
    pub duration_min: u32,
    pub status: VisitStatus,
    pub contact: Contact,
    pub notes: Option<String>,
    pub created_at: Ms,
}

/// A listing plus everything booked against it.
#[derive(Debug, Clone)]
pub struct ListingState {
    pub listing: Listing,
    /// Sorted by `range.start`.
    pub reservations: Vec<Reservation>,
    /// Sorted by `scheduled_at`.
    pub visits: Vec<Visit>,
    /// Set under the write lock when the listing is deleted. A handle cloned
    /// out of the index before that must treat the listing as gone.
    pub deleted: bool,
}

impl ListingState {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            reservations: Vec::new(),
            visits: Vec::new(),
            deleted: false,
        }
    }

    pub fn id(&self) -> Ulid {
        self.listing.id
    }

    /// Insert maintaining sort order by start date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations starting on or before `day`. Anything later cannot
    /// overlap a range ending on `day`.
    pub fn reservations_starting_by(&self, day: Day) -> &[Reservation] {
        let right_bound = self.reservations.partition_point(|r| r.range.start <= day);
        &self.reservations[..right_bound]
    }

    pub fn has_blocking_reservations(&self) -> bool {
        self.reservations.iter().any(|r| r.status.is_blocking())
    }

    pub fn insert_visit(&mut self, visit: Visit) {
        let pos = self
            .visits
            .partition_point(|v| v.scheduled_at <= visit.scheduled_at);
        self.visits.insert(pos, visit);
    }

    pub fn visit(&self, id: Ulid) -> Option<&Visit> {
        self.visits.iter().find(|v| v.id == id)
    }

    pub fn visit_mut(&mut self, id: Ulid) -> Option<&mut Visit> {
        self.visits.iter_mut().find(|v| v.id == id)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ListingCreated {
        id: Ulid,
        slug: String,
        title: String,
        description: Option<String>,
        purpose: ListingPurpose,
        kind: PropertyKind,
        price: i64,
        currency: String,
        city: String,
        address: Option<String>,
        area_m2: Option<u32>,
        bedrooms: Option<u32>,
        bathrooms: Option<u32>,
        year_built: Option<i32>,
        status: ListingStatus,
        created_at: Ms,
    },
    ListingStatusChanged {
        id: Ulid,
        status: ListingStatus,
    },
    ListingDeleted {
        id: Ulid,
    },
    ReservationRequested {
        id: Ulid,
        listing_id: Ulid,
        range: DateRange,
        contact: Contact,
        notes: Option<String>,
        created_at: Ms,
    },
    ReservationStatusChanged {
        id: Ulid,
        listing_id: Ulid,
        status: ReservationStatus,
    },
    VisitRequested {
        id: Ulid,
        listing_id: Ulid,
        scheduled_at: NaiveDateTime,
        duration_min: u32,
        contact: Contact,
        notes: Option<String>,
        created_at: Ms,
    },
    VisitStatusChanged {
        id: Ulid,
        listing_id: Ulid,
        status: VisitStatus,
    },
}

impl Event {
    /// Listing the event belongs to.
    pub fn listing_id(&self) -> Ulid {
        match self {
            Event::ListingCreated { id, .. }
            | Event::ListingStatusChanged { id, .. }
            | Event::ListingDeleted { id } => *id,
            Event::ReservationRequested { listing_id, .. }
            | Event::ReservationStatusChanged { listing_id, .. }
            | Event::VisitRequested { listing_id, .. }
            | Event::VisitStatusChanged { listing_id, .. } => *listing_id,
        }
    }

    pub fn listing_created(listing: &Listing) -> Self {
        Event::ListingCreated {
            id: listing.id,
            slug: listing.slug.clone(),
            title: listing.title.clone(),
            description: listing.description.clone(),
            purpose: listing.purpose,
            kind: listing.kind,
            price: listing.price,
            currency: listing.currency.clone(),
            city: listing.city.clone(),
            address: listing.address.clone(),
            area_m2: listing.area_m2,
            bedrooms: listing.bedrooms,
            bathrooms: listing.bathrooms,
            year_built: listing.year_built,
            status: listing.status,
            created_at: listing.created_at,
        }
    }
}

// ── Requests and queries ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub title: String,
    pub description: Option<String>,
    pub purpose: ListingPurpose,
    pub kind: PropertyKind,
    pub price: i64,
    pub currency: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub area_m2: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub year_built: Option<i32>,
    pub status: Option<ListingStatus>,
}

/// A proposed stay. Not persisted until admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub listing_id: Ulid,
    pub start_date: Day,
    pub end_date: Day,
    pub contact: Contact,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRequest {
    pub listing_id: Ulid,
    /// `None` books the default slot.
    pub scheduled_at: Option<NaiveDateTime>,
    pub duration_min: Option<u32>,
    pub contact: Contact,
    pub notes: Option<String>,
}

text_enum!(
    SortOrder, "sort order" {
        PriceAsc => "price_asc",
        PriceDesc => "price_desc",
        DateDesc => "date_desc",
        DateAsc => "date_asc",
    }
);

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::DateDesc
    }
}

/// Catalog query. Unset fields do not filter, except `status`, which
/// defaults to published listings only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    pub purpose: Option<ListingPurpose>,
    pub kind: Option<PropertyKind>,
    /// Case-insensitive substring match.
    pub city: Option<String>,
    /// `None` lists every status.
    pub status: Option<ListingStatus>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_area: Option<u32>,
    pub max_area: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    /// Case-insensitive substring of the title or the city.
    pub q: Option<String>,
    /// Keep only listings whose calendar admits this whole range.
    pub available: Option<DateRange>,
    pub sort: SortOrder,
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            purpose: None,
            kind: None,
            city: None,
            status: Some(ListingStatus::Publie),
            min_price: None,
            max_price: None,
            min_area: None,
            max_area: None,
            bedrooms: None,
            bathrooms: None,
            q: None,
            available: None,
            sort: SortOrder::default(),
            page: 1,
            per_page: crate::limits::DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListingFilter {
    /// Back-office listing: every status unless one is asked for.
    pub fn admin() -> Self {
        Self {
            status: None,
            ..Self::default()
        }
    }
}

text_enum!(
    /// Visits relative to the current time.
    VisitPeriod, "visit period" {
        Upcoming => "upcoming",
        Past => "past",
    }
);

impl VisitPeriod {
    pub fn includes(&self, scheduled_at: NaiveDateTime, now: NaiveDateTime) -> bool {
        match self {
            VisitPeriod::Upcoming => scheduled_at >= now,
            VisitPeriod::Past => scheduled_at < now,
        }
    }
}

/// Back-office dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_listings: usize,
    pub published_listings: usize,
    pub pending_reservations: usize,
    /// Pending visits scheduled from now on.
    pub upcoming_visits: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Cut one page out of an already filtered and sorted list.
    pub fn slice(all: Vec<T>, page: usize, per_page: usize) -> Self {
        let total = all.len();
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total_pages = total.div_ceil(per_page);
        let data = all
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}
