//! Display helpers for prices, areas and dates (French conventions).

use chrono::{NaiveDateTime, NaiveTime};

use crate::model::{DateRange, Day};

pub const DEFAULT_CURRENCY: &str = "TND";

/// Thousands separator used by the `fr` locale (narrow no-break space).
const GROUP_SEPARATOR: char = '\u{202F}';

pub const DEFAULT_INTEREST_RATE: f64 = 0.07;
pub const DEFAULT_LOAN_YEARS: u32 = 20;

/// Hour of the default visit slot.
const DEFAULT_VISIT_HOUR: u32 = 14;

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 * 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(GROUP_SEPARATOR);
        }
        out.push(c);
    }
    out
}

/// `1 200 000 TND`
pub fn format_price(price: i64, currency: &str) -> String {
    let sign = if price < 0 { "-" } else { "" };
    format!("{sign}{} {currency}", group_thousands(price.unsigned_abs()))
}

pub fn format_price_range(min: i64, max: i64, currency: &str) -> String {
    if min == max {
        return format_price(min, currency);
    }
    format!("{} - {}", format_price(min, currency), format_price(max, currency))
}

pub fn is_valid_price_range(min: i64, max: i64) -> bool {
    min >= 0 && max >= min
}

pub fn format_area(area_m2: u32) -> String {
    format!("{area_m2} m²")
}

/// Rounded price per square metre; 0 when the area is unknown.
pub fn price_per_m2(price: i64, area_m2: u32) -> i64 {
    if area_m2 == 0 {
        return 0;
    }
    (price as f64 / area_m2 as f64).round() as i64
}

/// Rough fixed-rate loan estimate, rounded to whole units.
pub fn monthly_payment(price: i64, down_payment: i64, annual_rate: f64, years: u32) -> i64 {
    let principal = (price - down_payment) as f64;
    let payments = f64::from(years * 12);
    if payments == 0.0 {
        return 0;
    }
    let monthly_rate = annual_rate / 12.0;
    if monthly_rate == 0.0 {
        return (principal / payments).round() as i64;
    }
    let growth = (1.0 + monthly_rate).powf(payments);
    (principal * monthly_rate * growth / (growth - 1.0)).round() as i64
}

/// `dd/MM/yyyy`
pub fn format_date(day: Day) -> String {
    day.format("%d/%m/%Y").to_string()
}

pub fn format_date_range(range: &DateRange) -> String {
    if range.start == range.end {
        return format_date(range.start);
    }
    format!("{} - {}", format_date(range.start), format_date(range.end))
}

/// `dd/MM/yyyy à HH:mm`
pub fn format_date_time(at: NaiveDateTime) -> String {
    at.format("%d/%m/%Y à %H:%M").to_string()
}

/// Slot offered when a visit request names no time: the next day at 14:00.
pub fn default_visit_slot(today: Day) -> NaiveDateTime {
    let tomorrow = today.succ_opt().unwrap_or(today);
    tomorrow.and_time(NaiveTime::from_hms_opt(DEFAULT_VISIT_HOUR, 0, 0).unwrap_or(NaiveTime::MIN))
}
