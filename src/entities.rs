//! Entity Extractor: time / person / location parsing from free text.
//!
//! Three independent extractors, each returning `None`/a default when not
//! found. Grounded on the ordered-regex-with-fallback idiom in
//! `peter-hollis-orkastrate-engram/crates/engram-action/src/intent/patterns.rs`
//! (compiled-once patterns tried in priority order) for the Name and
//! Location extractors, and on `chrono`'s `NaiveDate`/`Weekday` arithmetic
//! for the relative-date resolution Time requires.
//!
//! No NLP person-tagger crate is in this workspace's dependency stack —
//! adding one here would be scope creep beyond what any pack repo
//! grounds, so the Name extractor applies its three ordered regexes
//! directly rather than attempting a tagger pass first.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EntityError;

static COLON_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*(am|pm)?\b").unwrap());
static AMPM_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(am|pm)\b").unwrap());
static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bnext\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});

static NAME_RE_BOOK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i:book|schedule)\s+([A-Z][a-z]+)\b").unwrap());
static NAME_RE_FOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i:for|patient)\s+([A-Z][a-z]+)\b").unwrap());
static NAME_RE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+)\s+(?i:tomorrow|today|next|at|for)\b").unwrap());

const LOCATIONS: &[&str] = &[
    "midtown",
    "uptown",
    "downtown",
    "brooklyn",
    "queens",
    "bronx",
    "manhattan",
];
const DEFAULT_LOCATION: &str = "Midtown";

/// Resolve a natural-language time expression to an absolute UTC instant,
/// relative to `now` (the server clock). Recognizes `today`/`tomorrow`/
/// `next <weekday>` for the date and `at <time>` / a bare `HH:MM`/`H am|pm`
/// for the time of day.
pub fn extract_time(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, EntityError> {
    let lower = text.to_lowercase();

    let mut date = now.date_naive();
    if lower.contains("tomorrow") {
        date += Duration::days(1);
    } else if let Some(caps) = WEEKDAY_RE.captures(&lower) {
        let weekday = parse_weekday(&caps[1]).ok_or(EntityError::NoTimeFound)?;
        date = next_weekday_date(date, weekday);
    }
    // "today" and otherwise-unqualified dates keep `date` as-is.

    let time_of_day = extract_clock_time(&lower).ok_or(EntityError::NoTimeFound)?;
    let naive = date.and_time(time_of_day);
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn extract_clock_time(lower: &str) -> Option<NaiveTime> {
    if let Some(caps) = COLON_TIME_RE.captures(lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        let ampm = caps.get(3).map(|m| m.as_str().to_lowercase());
        let hour24 = adjust_for_ampm(hour, ampm.as_deref());
        return NaiveTime::from_hms_opt(hour24, minute, 0);
    }
    if let Some(caps) = AMPM_TIME_RE.captures(lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let ampm = caps.get(2).map(|m| m.as_str().to_lowercase());
        let hour24 = adjust_for_ampm(hour, ampm.as_deref());
        return NaiveTime::from_hms_opt(hour24, 0, 0);
    }
    None
}

fn adjust_for_ampm(hour: u32, ampm: Option<&str>) -> u32 {
    match ampm {
        Some("pm") if hour < 12 => hour + 12,
        Some("am") if hour == 12 => 0,
        _ => hour,
    }
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// The next date (strictly after `from`) that falls on `weekday`.
fn next_weekday_date(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let mut d = from + Duration::days(1);
    while d.weekday() != weekday {
        d += Duration::days(1);
    }
    d
}

/// Extract a person name via the three ordered regexes, taking the
/// first match.
pub fn extract_name(text: &str) -> Result<String, EntityError> {
    for re in [&*NAME_RE_BOOK, &*NAME_RE_FOR, &*NAME_RE_SUFFIX] {
        if let Some(caps) = re.captures(text) {
            return Ok(caps[1].to_string());
        }
    }
    Err(EntityError::NoNameFound)
}

/// Case-insensitive substring match over the fixed city list; first match
/// wins, defaulting to `Midtown`.
pub fn extract_location(text: &str) -> String {
    let lower = text.to_lowercase();
    for city in LOCATIONS {
        if lower.contains(city) {
            return capitalize(city);
        }
    }
    DEFAULT_LOCATION.to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap()
    }

    #[test]
    fn extracts_tomorrow_at_time() {
        let result = extract_time("Book Chen for tomorrow at 10:30", fixed_now()).unwrap();
        assert_eq!(result.date_naive(), fixed_now().date_naive() + Duration::days(1));
        assert_eq!(result.time().hour_minute(), (10, 30));
    }

    trait HourMinute {
        fn hour_minute(&self) -> (u32, u32);
    }
    impl HourMinute for NaiveTime {
        fn hour_minute(&self) -> (u32, u32) {
            use chrono::Timelike;
            (self.hour(), self.minute())
        }
    }

    #[test]
    fn extracts_bare_time_without_at_keyword() {
        let result = extract_time("Make it 11:00", fixed_now()).unwrap();
        assert_eq!(result.date_naive(), fixed_now().date_naive());
        assert_eq!(result.time().hour_minute(), (11, 0));
    }

    #[test]
    fn extracts_am_pm_without_colon() {
        let result = extract_time("book Rivera for tomorrow at 9am", fixed_now()).unwrap();
        assert_eq!(result.time().hour_minute(), (9, 0));
    }

    #[test]
    fn pm_marker_shifts_to_24_hour() {
        let result = extract_time("book for today at 3pm", fixed_now()).unwrap();
        assert_eq!(result.time().hour_minute(), (15, 0));
    }

    #[test]
    fn missing_time_is_an_error() {
        assert!(extract_time("Book for tomorrow", fixed_now()).is_err());
    }

    #[test]
    fn next_weekday_resolves_forward() {
        // 2026-07-28 is a Tuesday.
        let result = extract_time("book for next monday at 9am", fixed_now()).unwrap();
        assert_eq!(result.weekday(), Weekday::Mon);
        assert!(result.date_naive() > fixed_now().date_naive());
    }

    #[test]
    fn name_extraction_prefers_book_pattern() {
        assert_eq!(extract_name("Book Chen for tomorrow at 10:30").unwrap(), "Chen");
    }

    #[test]
    fn name_extraction_falls_back_to_for_pattern() {
        assert_eq!(extract_name("schedule an appointment for Rivera").unwrap(), "Rivera");
    }

    #[test]
    fn name_extraction_falls_back_to_suffix_pattern() {
        assert_eq!(extract_name("Patel tomorrow please").unwrap(), "Patel");
    }

    #[test]
    fn name_extraction_fails_without_a_capitalized_name() {
        assert!(extract_name("book for tomorrow").is_err());
    }

    #[test]
    fn location_matches_known_city() {
        assert_eq!(extract_location("book Rivera for tomorrow at 9am at Uptown"), "Uptown");
    }

    #[test]
    fn location_defaults_to_midtown() {
        assert_eq!(extract_location("book Chen for tomorrow at 10:30"), "Midtown");
    }
}
