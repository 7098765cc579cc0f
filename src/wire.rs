//! Line protocol: one statement per request line, one JSON object per reply
//! line. Notifications for LISTENed listings are interleaved between replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::format::{
    format_area, format_date_range, format_date_time, format_price, format_price_range, monthly_payment,
    price_per_m2, DEFAULT_INTEREST_RATE, DEFAULT_LOAN_YEARS,
};
use crate::limits::{MAX_LINE_LEN, MAX_LISTENS_PER_CONNECTION};
use crate::model::*;
use crate::notify::{channel_name, parse_channel, Subscription};
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

/// Pending notifications per connection before the forwarders wait.
const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        tag: String,
        rows: Vec<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<PageInfo>,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Notification {
        channel: String,
        event: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageInfo {
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    /// Cheapest to dearest listing on this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
}

impl Reply {
    fn tag(tag: impl Into<String>) -> Self {
        Reply::Ok {
            tag: tag.into(),
            rows: Vec::new(),
            page: None,
        }
    }

    fn rows(rows: Vec<serde_json::Value>) -> Self {
        Reply::Ok {
            tag: format!("SELECT {}", rows.len()),
            rows,
            page: None,
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","code":"XX000","message":"cannot encode reply: {e}"}}"#)
        })
    }
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug)]
enum WireError {
    Sql(SqlError),
    Engine(EngineError),
    BadChannel(String),
    TooManyListens,
    Encode(serde_json::Error),
}

impl From<SqlError> for WireError {
    fn from(e: SqlError) -> Self {
        WireError::Sql(e)
    }
}

impl From<EngineError> for WireError {
    fn from(e: EngineError) -> Self {
        WireError::Engine(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encode(e)
    }
}

impl WireError {
    /// PostgreSQL SQLSTATE for the failure.
    fn code(&self) -> &'static str {
        match self {
            WireError::Sql(SqlError::UnknownTable(_)) => "42P01",
            WireError::Sql(_) => "42601",
            WireError::Engine(e) => engine_code(e),
            WireError::BadChannel(_) => "42000",
            WireError::TooManyListens => "54000",
            WireError::Encode(_) => "XX000",
        }
    }

    fn into_reply(self) -> Reply {
        let code = self.code();
        let message = match self {
            WireError::Sql(e) => e.to_string(),
            WireError::Engine(e) => e.to_string(),
            WireError::BadChannel(c) => format!("invalid channel: {c} (expected listing_{{id}})"),
            WireError::TooManyListens => {
                format!("at most {MAX_LISTENS_PER_CONNECTION} channels per connection")
            }
            WireError::Encode(e) => format!("cannot encode rows: {e}"),
        };
        Reply::Error { code, message }
    }
}

fn engine_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidRange(_) | EngineError::InvalidInput(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidTransition { .. } | EngineError::NotBookable { .. } => "55000",
        EngineError::HasActiveReservations(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

// ── Row shapes ───────────────────────────────────────────────────

#[derive(Serialize)]
struct ListingRow<'a> {
    #[serde(flatten)]
    listing: &'a Listing,
    price_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    area_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price_per_m2: Option<i64>,
    /// Loan estimate for properties on sale.
    #[serde(skip_serializing_if = "Option::is_none")]
    monthly_estimate: Option<i64>,
}

impl<'a> ListingRow<'a> {
    fn new(listing: &'a Listing) -> Self {
        let on_sale = listing.purpose == ListingPurpose::Vente;
        Self {
            listing,
            price_display: format_price(listing.price, &listing.currency),
            area_display: listing.area_m2.map(format_area),
            price_per_m2: listing
                .area_m2
                .filter(|a| *a > 0)
                .map(|a| price_per_m2(listing.price, a)),
            monthly_estimate: on_sale
                .then(|| monthly_payment(listing.price, 0, DEFAULT_INTEREST_RATE, DEFAULT_LOAN_YEARS)),
        }
    }
}

#[derive(Serialize)]
struct ReservationRow<'a> {
    #[serde(flatten)]
    reservation: &'a Reservation,
    dates_display: String,
}

#[derive(Serialize)]
struct VisitRow<'a> {
    #[serde(flatten)]
    visit: &'a Visit,
    scheduled_display: String,
}

#[derive(Serialize)]
struct RangeRow {
    #[serde(flatten)]
    range: DateRange,
    days: i64,
    dates_display: String,
}

impl From<DateRange> for RangeRow {
    fn from(range: DateRange) -> Self {
        Self {
            range,
            days: range.days(),
            dates_display: format_date_range(&range),
        }
    }
}

fn to_rows<T: Serialize>(items: impl IntoIterator<Item = T>) -> Result<Vec<serde_json::Value>, WireError> {
    items
        .into_iter()
        .map(|item| serde_json::to_value(item).map_err(WireError::from))
        .collect()
}

fn listing_rows<'a>(listings: impl IntoIterator<Item = &'a Listing>) -> Result<Vec<serde_json::Value>, WireError> {
    to_rows(listings.into_iter().map(ListingRow::new))
}

fn reservation_rows(reservations: &[Reservation]) -> Result<Vec<serde_json::Value>, WireError> {
    to_rows(reservations.iter().map(|r| ReservationRow {
        reservation: r,
        dates_display: format_date_range(&r.range),
    }))
}

fn visit_rows(visits: &[Visit]) -> Result<Vec<serde_json::Value>, WireError> {
    to_rows(visits.iter().map(|v| VisitRow {
        visit: v,
        scheduled_display: format_date_time(v.scheduled_at),
    }))
}

fn page_reply(page: Page<Listing>) -> Result<Reply, WireError> {
    let price_range = match (
        page.data.iter().map(|l| l.price).min(),
        page.data.iter().map(|l| l.price).max(),
        page.data.first(),
    ) {
        (Some(min), Some(max), Some(first)) if page.data.iter().all(|l| l.currency == first.currency) => {
            Some(format_price_range(min, max, &first.currency))
        }
        _ => None,
    };
    let rows = listing_rows(&page.data)?;
    Ok(Reply::Ok {
        tag: format!("SELECT {}", rows.len()),
        rows,
        page: Some(PageInfo {
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages: page.total_pages,
            price_range,
        }),
    })
}

// ── Session ──────────────────────────────────────────────────────

struct Session {
    engine: Arc<Engine>,
    /// Canonical channel name → forwarding task.
    listens: HashMap<String, JoinHandle<()>>,
    outbox: mpsc::Sender<Reply>,
}

impl Session {
    async fn handle_line(&mut self, line: &str) -> Reply {
        let cmd = match sql::parse_sql(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "parse", "status" => "error").increment(1);
                return WireError::Sql(e).into_reply();
            }
        };

        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        result.unwrap_or_else(|e| {
            debug!("{label} failed: {}", e.code());
            e.into_reply()
        })
    }

    async fn execute(&mut self, cmd: Command) -> Result<Reply, WireError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertListing { id, listing } => {
                let listing = engine.create_listing(id, listing).await?;
                Ok(Reply::Ok {
                    tag: "INSERT 0 1".into(),
                    rows: listing_rows([&listing])?,
                    page: None,
                })
            }
            Command::SetListingStatus { id, status } => {
                engine.set_listing_status(id, status).await?;
                Ok(Reply::tag("INSERT 0 1"))
            }
            Command::DeleteListing { id } => {
                engine.delete_listing(id).await?;
                Ok(Reply::tag("DELETE 1"))
            }
            Command::InsertReservation { id, request } => {
                let reservation = engine.request_reservation(id, request).await?;
                Ok(Reply::Ok {
                    tag: "INSERT 0 1".into(),
                    rows: reservation_rows(std::slice::from_ref(&reservation))?,
                    page: None,
                })
            }
            Command::SetReservationStatus { id, status } => {
                engine.set_reservation_status(id, status).await?;
                Ok(Reply::tag("INSERT 0 1"))
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await?;
                Ok(Reply::tag("DELETE 1"))
            }
            Command::InsertVisit { id, request } => {
                let visit = engine.request_visit(id, request).await?;
                Ok(Reply::Ok {
                    tag: "INSERT 0 1".into(),
                    rows: visit_rows(std::slice::from_ref(&visit))?,
                    page: None,
                })
            }
            Command::SetVisitStatus { id, status } => {
                engine.set_visit_status(id, status).await?;
                Ok(Reply::tag("INSERT 0 1"))
            }
            Command::CancelVisit { id } => {
                engine.cancel_visit(id).await?;
                Ok(Reply::tag("DELETE 1"))
            }
            Command::SelectListings(filter) => page_reply(engine.list_listings(&filter).await?),
            Command::SelectListingById { id } => {
                let listing = engine.get_listing(id).await?;
                Ok(Reply::rows(listing_rows([&listing])?))
            }
            Command::SelectListingBySlug { slug } => {
                let listing = engine.get_listing_by_slug(&slug).await;
                Ok(Reply::rows(listing_rows(listing.as_ref())?))
            }
            Command::SelectReservations { listing_id, status } => {
                let reservations = match listing_id {
                    Some(id) => engine.reservations(id, status).await?,
                    None => engine.all_reservations(status).await,
                };
                Ok(Reply::rows(reservation_rows(&reservations)?))
            }
            Command::SelectVisits { listing_id, status, period } => {
                let now = chrono::Utc::now().naive_utc();
                let visits = match listing_id {
                    Some(id) => {
                        let mut visits = engine.visits(id, status).await?;
                        visits.retain(|v| period.is_none_or(|p| p.includes(v.scheduled_at, now)));
                        visits
                    }
                    None => engine.all_visits(status, period, now).await,
                };
                Ok(Reply::rows(visit_rows(&visits)?))
            }
            Command::SelectStats => {
                let stats = engine.stats(chrono::Utc::now().naive_utc()).await;
                Ok(Reply::rows(to_rows([stats])?))
            }
            Command::SelectBlockedDates { listing_id } => {
                let blocked = engine.blocked_intervals(listing_id).await?;
                Ok(Reply::rows(to_rows(blocked.into_iter().map(RangeRow::from))?))
            }
            Command::SelectAdmissible { listing_id, start, end } => {
                let available = engine.is_admissible(listing_id, start, end).await?;
                Ok(Reply::rows(vec![serde_json::json!({
                    "listing_id": listing_id,
                    "start_date": start,
                    "end_date": end,
                    "available": available,
                })]))
            }
            Command::SelectDateBlocked { listing_id, date } => {
                let blocked = engine.is_date_blocked(listing_id, date).await?;
                Ok(Reply::rows(vec![serde_json::json!({
                    "listing_id": listing_id,
                    "date": date,
                    "blocked": blocked,
                })]))
            }
            Command::SelectFreeDates { listing_id, start, end } => {
                let free = engine.free_dates(listing_id, start, end).await?;
                Ok(Reply::rows(to_rows(free.into_iter().map(RangeRow::from))?))
            }
            Command::Listen { channel } => {
                self.listen(&channel)?;
                Ok(Reply::tag("LISTEN"))
            }
            Command::Unlisten { channel } => {
                let listing_id = parse_channel(&channel).ok_or(WireError::BadChannel(channel))?;
                if let Some(task) = self.listens.remove(&channel_name(listing_id)) {
                    task.abort();
                }
                Ok(Reply::tag("UNLISTEN"))
            }
            Command::UnlistenAll => {
                self.unlisten_all();
                Ok(Reply::tag("UNLISTEN"))
            }
        }
    }

    fn listen(&mut self, channel: &str) -> Result<(), WireError> {
        let listing_id = parse_channel(channel).ok_or_else(|| WireError::BadChannel(channel.to_string()))?;
        let name = channel_name(listing_id);
        if self.listens.contains_key(&name) {
            return Ok(());
        }
        if self.listens.len() >= MAX_LISTENS_PER_CONNECTION {
            return Err(WireError::TooManyListens);
        }
        let subscription = self.engine.notify.subscribe(listing_id);
        let task = tokio::spawn(forward_notifications(name.clone(), subscription, self.outbox.clone()));
        self.listens.insert(name, task);
        Ok(())
    }

    fn unlisten_all(&mut self) {
        for (_, task) in self.listens.drain() {
            task.abort();
        }
    }
}

/// Copy one listing's events into the connection outbox until either side
/// closes. Aborting the task drops the subscription.
async fn forward_notifications(channel: String, mut subscription: Subscription, outbox: mpsc::Sender<Reply>) {
    loop {
        let event = match subscription.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("{channel}: listener lagged, {n} notifications dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let event = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                warn!("{channel}: cannot encode notification: {e}");
                continue;
            }
        };
        let note = Reply::Notification {
            channel: channel.clone(),
            event,
        };
        if outbox.send(note).await.is_err() {
            break;
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);
    let mut session = Session {
        engine,
        listens: HashMap::new(),
        outbox,
    };

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => break Ok(()),
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => session.handle_line(&line).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Reply::Error {
                            code: "54000",
                            message: format!("request line longer than {MAX_LINE_LEN} bytes"),
                        };
                        // Framed ends the stream after a decode error, so say why and hang up.
                        break framed.send(reply.to_line()).await;
                    }
                    Some(Err(e)) => break Err(e),
                };
                if let Err(e) = framed.send(reply.to_line()).await {
                    break Err(e);
                }
            }
            Some(note) = inbox.recv() => {
                if let Err(e) = framed.send(note.to_line()).await {
                    break Err(e);
                }
            }
        }
    };

    session.unlisten_all();
    result
}
