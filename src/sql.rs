use std::str::FromStr;

use chrono::NaiveDateTime;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from one request line.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertListing {
        id: Ulid,
        listing: NewListing,
    },
    SetListingStatus {
        id: Ulid,
        status: ListingStatus,
    },
    DeleteListing {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        request: ReservationRequest,
    },
    SetReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    CancelReservation {
        id: Ulid,
    },
    InsertVisit {
        id: Ulid,
        request: VisitRequest,
    },
    SetVisitStatus {
        id: Ulid,
        status: VisitStatus,
    },
    CancelVisit {
        id: Ulid,
    },
    SelectListings(ListingFilter),
    SelectListingById {
        id: Ulid,
    },
    SelectListingBySlug {
        slug: String,
    },
    /// Without `listing_id` this is the back-office list across listings.
    SelectReservations {
        listing_id: Option<Ulid>,
        status: Option<ReservationStatus>,
    },
    SelectVisits {
        listing_id: Option<Ulid>,
        status: Option<VisitStatus>,
        period: Option<VisitPeriod>,
    },
    SelectStats,
    SelectBlockedDates {
        listing_id: Ulid,
    },
    SelectAdmissible {
        listing_id: Ulid,
        start: Day,
        end: Day,
    },
    SelectDateBlocked {
        listing_id: Ulid,
        date: Day,
    },
    SelectFreeDates {
        listing_id: Ulid,
        start: Day,
        end: Day,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_listen(trimmed) {
        return cmd;
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("one statement per line".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// LISTEN and UNLISTEN are matched by keyword, channel names are opaque.
fn parse_listen(trimmed: &str) -> Option<Result<Command, SqlError>> {
    let (keyword, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    let channel = rest.trim().trim_matches('"').to_string();
    let cmd = match keyword.to_ascii_uppercase().as_str() {
        "LISTEN" if channel.is_empty() => Err(SqlError::MissingFilter("channel")),
        "LISTEN" => Ok(Command::Listen { channel }),
        "UNLISTEN" if channel == "*" => Ok(Command::UnlistenAll),
        "UNLISTEN" if channel.is_empty() => Err(SqlError::MissingFilter("channel")),
        "UNLISTEN" => Ok(Command::Unlisten { channel }),
        _ => return None,
    };
    Some(cmd)
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let v = Values(&values);

    match table.as_str() {
        "listings" => {
            v.require("listings", 5)?;
            Ok(Command::InsertListing {
                id: parse_ulid(&values[0])?,
                listing: NewListing {
                    title: parse_text(&values[1])?,
                    purpose: parse_enum(&values[2])?,
                    kind: parse_enum(&values[3])?,
                    price: parse_i64(&values[4])?,
                    currency: v.optional(5, parse_text)?,
                    city: v.optional(6, parse_text)?,
                    area_m2: v.optional(7, parse_u32)?,
                    bedrooms: v.optional(8, parse_u32)?,
                    status: v.optional(9, parse_enum)?,
                    description: v.optional(10, parse_text)?,
                    address: v.optional(11, parse_text)?,
                    bathrooms: v.optional(12, parse_u32)?,
                    year_built: v.optional(13, parse_i32)?,
                },
            })
        }
        "listing_status" => {
            v.require("listing_status", 2)?;
            Ok(Command::SetListingStatus {
                id: parse_ulid(&values[0])?,
                status: parse_enum(&values[1])?,
            })
        }
        "reservations" => {
            v.require("reservations", 5)?;
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                request: ReservationRequest {
                    listing_id: parse_ulid(&values[1])?,
                    start_date: parse_date(&values[2])?,
                    end_date: parse_date(&values[3])?,
                    contact: Contact {
                        email: v.optional(4, parse_text)?,
                        phone: v.optional(5, parse_text)?,
                        name: v.optional(6, parse_text)?,
                    },
                    notes: v.optional(7, parse_text)?,
                },
            })
        }
        "reservation_status" => {
            v.require("reservation_status", 2)?;
            Ok(Command::SetReservationStatus {
                id: parse_ulid(&values[0])?,
                status: parse_enum(&values[1])?,
            })
        }
        "visits" => {
            v.require("visits", 4)?;
            Ok(Command::InsertVisit {
                id: parse_ulid(&values[0])?,
                request: VisitRequest {
                    listing_id: parse_ulid(&values[1])?,
                    scheduled_at: v.optional(2, parse_date_time_expr)?,
                    contact: Contact {
                        email: v.optional(3, parse_text)?,
                        phone: v.optional(5, parse_text)?,
                        name: v.optional(6, parse_text)?,
                    },
                    duration_min: v.optional(4, parse_u32)?,
                    notes: v.optional(7, parse_text)?,
                },
            })
        }
        "visit_status" => {
            v.require("visit_status", 2)?;
            Ok(Command::SetVisitStatus {
                id: parse_ulid(&values[0])?,
                status: parse_enum(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Positional VALUES with optional trailing columns. NULL or absent is `None`.
struct Values<'a>(&'a [Expr]);

impl Values<'_> {
    fn require(&self, table: &'static str, min: usize) -> Result<(), SqlError> {
        if self.0.len() < min {
            return Err(SqlError::WrongArity(table, min, self.0.len()));
        }
        Ok(())
    }

    fn optional<T>(&self, idx: usize, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
        match self.0.get(idx) {
            None => Ok(None),
            Some(expr) if is_null(expr) => Ok(None),
            Some(expr) => parse(expr).map(Some),
        }
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "listings" => Ok(Command::DeleteListing { id }),
        "reservations" => Ok(Command::CancelReservation { id }),
        "visits" => Ok(Command::CancelVisit { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// One `column <op> value` term of a WHERE conjunction.
struct Predicate<'a> {
    column: String,
    op: Op,
    value: &'a Expr,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut preds = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut preds)?;
    }

    match table.as_str() {
        "listings" => parse_listings_query(&preds, ListingFilter::default()),
        "admin_listings" => parse_listings_query(&preds, ListingFilter::admin()),
        "reservations" => {
            let mut listing_id = None;
            let mut status = None;
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("listing_id", Op::Eq) => listing_id = Some(parse_ulid(p.value)?),
                    ("status", Op::Eq) => status = Some(parse_enum(p.value)?),
                    _ => return Err(unsupported_predicate(p)),
                }
            }
            Ok(Command::SelectReservations { listing_id, status })
        }
        "visits" => {
            let (mut listing_id, mut status, mut period) = (None, None, None);
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("listing_id", Op::Eq) => listing_id = Some(parse_ulid(p.value)?),
                    ("status", Op::Eq) => status = Some(parse_enum(p.value)?),
                    ("period", Op::Eq) => period = Some(parse_enum(p.value)?),
                    _ => return Err(unsupported_predicate(p)),
                }
            }
            Ok(Command::SelectVisits { listing_id, status, period })
        }
        "stats" => match preds.first() {
            Some(p) => Err(unsupported_predicate(p)),
            None => Ok(Command::SelectStats),
        },
        "blocked_dates" => {
            let mut listing_id = None;
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("listing_id", Op::Eq) => listing_id = Some(parse_ulid(p.value)?),
                    _ => return Err(unsupported_predicate(p)),
                }
            }
            Ok(Command::SelectBlockedDates {
                listing_id: listing_id.ok_or(SqlError::MissingFilter("listing_id"))?,
            })
        }
        "availability" => {
            let (mut listing_id, mut start, mut end, mut date) = (None, None, None, None);
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("listing_id", Op::Eq) => listing_id = Some(parse_ulid(p.value)?),
                    ("start_date", Op::Eq) => start = Some(parse_date(p.value)?),
                    ("end_date", Op::Eq) => end = Some(parse_date(p.value)?),
                    ("date", Op::Eq) => date = Some(parse_date(p.value)?),
                    _ => return Err(unsupported_predicate(p)),
                }
            }
            let listing_id = listing_id.ok_or(SqlError::MissingFilter("listing_id"))?;
            match (date, start, end) {
                (Some(date), None, None) => Ok(Command::SelectDateBlocked { listing_id, date }),
                (None, Some(start), Some(end)) => Ok(Command::SelectAdmissible { listing_id, start, end }),
                (Some(_), _, _) => Err(SqlError::Unsupported("date with start_date/end_date".into())),
                (None, None, _) => Err(SqlError::MissingFilter("start_date")),
                (None, Some(_), None) => Err(SqlError::MissingFilter("end_date")),
            }
        }
        "free_dates" => {
            let (mut listing_id, mut start, mut end) = (None, None, None);
            for p in &preds {
                match (p.column.as_str(), p.op) {
                    ("listing_id", Op::Eq) => listing_id = Some(parse_ulid(p.value)?),
                    ("start_date", Op::GtEq | Op::Eq) => start = Some(parse_date(p.value)?),
                    ("end_date", Op::LtEq | Op::Eq) => end = Some(parse_date(p.value)?),
                    _ => return Err(unsupported_predicate(p)),
                }
            }
            Ok(Command::SelectFreeDates {
                listing_id: listing_id.ok_or(SqlError::MissingFilter("listing_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                end: end.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Catalog search. `sort`, `page` and `per_page` ride along as pseudo-columns.
/// `base` carries the table's defaults.
fn parse_listings_query(preds: &[Predicate<'_>], base: ListingFilter) -> Result<Command, SqlError> {
    if let [p] = preds
        && p.op == Op::Eq
    {
        match p.column.as_str() {
            "id" => return Ok(Command::SelectListingById { id: parse_ulid(p.value)? }),
            "slug" => return Ok(Command::SelectListingBySlug { slug: parse_text(p.value)? }),
            _ => {}
        }
    }

    let mut filter = base;
    let (mut from, mut to) = (None, None);
    for p in preds {
        match (p.column.as_str(), p.op) {
            ("purpose", Op::Eq) => filter.purpose = Some(parse_enum(p.value)?),
            ("kind", Op::Eq) => filter.kind = Some(parse_enum(p.value)?),
            ("city", Op::Eq) => filter.city = Some(parse_text(p.value)?),
            ("status", Op::Eq) => filter.status = Some(parse_enum(p.value)?),
            ("price", Op::GtEq) => filter.min_price = Some(parse_i64(p.value)?),
            ("price", Op::LtEq) => filter.max_price = Some(parse_i64(p.value)?),
            ("price", Op::Eq) => {
                let price = parse_i64(p.value)?;
                filter.min_price = Some(price);
                filter.max_price = Some(price);
            }
            ("area_m2", Op::GtEq) => filter.min_area = Some(parse_u32(p.value)?),
            ("area_m2", Op::LtEq) => filter.max_area = Some(parse_u32(p.value)?),
            ("bedrooms", Op::Eq) => filter.bedrooms = Some(parse_u32(p.value)?),
            ("bathrooms", Op::Eq) => filter.bathrooms = Some(parse_u32(p.value)?),
            ("q", Op::Eq) => filter.q = Some(parse_text(p.value)?),
            ("available_from", Op::Eq) => from = Some(parse_date(p.value)?),
            ("available_to", Op::Eq) => to = Some(parse_date(p.value)?),
            ("sort", Op::Eq) => filter.sort = parse_enum(p.value)?,
            ("page", Op::Eq) => filter.page = parse_usize(p.value)?,
            ("per_page", Op::Eq) => filter.per_page = parse_usize(p.value)?,
            _ => return Err(unsupported_predicate(p)),
        }
    }
    filter.available = match (from, to) {
        (None, None) => None,
        (Some(start), Some(end)) => Some(DateRange::new(start, end).map_err(|e| SqlError::Parse(e.to_string()))?),
        (Some(_), None) => return Err(SqlError::MissingFilter("available_to")),
        (None, Some(_)) => return Err(SqlError::MissingFilter("available_from")),
    };
    Ok(Command::SelectListings(filter))
}

fn collect_predicates<'a>(expr: &'a Expr, out: &mut Vec<Predicate<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_predicates(left, out)?;
                    return collect_predicates(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                ast::BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("{left}")))?;
            out.push(Predicate { column, op, value: right });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn unsupported_predicate(p: &Predicate<'_>) -> SqlError {
    let op = match p.op {
        Op::Eq => "=",
        Op::GtEq => ">=",
        Op::LtEq => "<=",
    };
    SqlError::Unsupported(format!("filter {} {op}", p.column))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_enum<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: FromStr<Err = UnknownVariant>,
{
    parse_text(expr)?
        .parse()
        .map_err(|e: UnknownVariant| SqlError::Parse(e.to_string()))
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_text(expr)?;
    parse_day(&s).map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_time_expr(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    let s = parse_text(expr)?;
    parse_date_time(&s).map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
