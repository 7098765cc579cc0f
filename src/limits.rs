//! Hard caps on input sizes. Checked at the engine and wire boundaries.

pub const MAX_LISTINGS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_LISTING: usize = 10_000;
pub const MAX_VISITS_PER_LISTING: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_CURRENCY_LEN: usize = 8;
pub const MAX_CITY_LEN: usize = 128;
pub const MAX_ADDRESS_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
/// Free-text catalog search term.
pub const MAX_SEARCH_LEN: usize = 128;

/// Longest stay a single reservation may cover, in days (inclusive count).
pub const MAX_STAY_DAYS: i64 = 366;
/// Widest calendar window a free-dates query may scan, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1_098;

pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;
/// Oldest construction year a listing may carry.
pub const MIN_YEAR_BUILT: i32 = 1800;

pub const DEFAULT_VISIT_DURATION_MIN: u32 = 30;
pub const MAX_VISIT_DURATION_MIN: u32 = 480;

pub const DEFAULT_PAGE_SIZE: usize = 12;
pub const MAX_PAGE_SIZE: usize = 100;

pub const MAX_LINE_LEN: usize = 64 * 1024;
pub const MAX_LISTENS_PER_CONNECTION: usize = 64;
