// src/ingest/validate.rs
//! Validation rule engine: decides per record whether it is fit for
//! downstream consumption. Rules are pure predicates combined with AND.
//!
//! Every source follows the same three categories (field presence, content
//! quality, temporal well-formedness) and supplies its own thresholds.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Weekday};
use metrics::counter;

use crate::ingest::types::{NormalizedRecord, ValidatedRecord};

/// Minimum content length (chars) for news articles.
pub const NEWS_MIN_CONTENT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// `title`, `content`, `url`, `published_at` must be present (empty counts as present).
    FieldPresence,
    /// `content` non-empty and at least `min_chars` characters long.
    ContentLength { min_chars: usize },
    /// `published_at` must parse as ISO-8601.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("content has {actual} chars, need {min}")]
    ContentTooShort { actual: usize, min: usize },
    #[error("unparsable published_at `{0}`")]
    BadTimestamp(String),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingField(_) => "missing_field",
            Rejection::ContentTooShort { .. } => "content_too_short",
            Rejection::BadTimestamp(_) => "bad_timestamp",
        }
    }
}

impl Rule {
    pub fn check(&self, r: &NormalizedRecord) -> Result<(), Rejection> {
        match *self {
            Rule::FieldPresence => {
                let fields = [
                    ("title", &r.title),
                    ("content", &r.content),
                    ("url", &r.url),
                    ("published_at", &r.published_at),
                ];
                match fields.iter().find(|(_, v)| v.is_none()) {
                    Some((name, _)) => Err(Rejection::MissingField(*name)),
                    None => Ok(()),
                }
            }
            Rule::ContentLength { min_chars } => {
                let actual = r.content.as_deref().map_or(0, |c| c.chars().count());
                if actual == 0 || actual < min_chars {
                    Err(Rejection::ContentTooShort {
                        actual,
                        min: min_chars,
                    })
                } else {
                    Ok(())
                }
            }
            Rule::Timestamp => {
                let ts = r.published_at.as_deref().unwrap_or_default();
                if parse_iso8601(ts).is_some() {
                    Ok(())
                } else {
                    Err(Rejection::BadTimestamp(ts.to_string()))
                }
            }
        }
    }
}

/// Ordered rule list; a record survives only if every rule passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Presence, content >= `min_chars`, well-formed timestamp.
    pub fn standard(min_chars: usize) -> Self {
        Self::new(vec![
            Rule::FieldPresence,
            Rule::ContentLength { min_chars },
            Rule::Timestamp,
        ])
    }

    pub fn news() -> Self {
        Self::standard(NEWS_MIN_CONTENT_CHARS)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First failing rule, if any.
    pub fn check(&self, record: &NormalizedRecord) -> Result<(), Rejection> {
        self.rules.iter().try_for_each(|rule| rule.check(record))
    }

    /// Keep records that pass every rule, preserving input order.
    pub fn apply(&self, records: Vec<NormalizedRecord>) -> Vec<ValidatedRecord> {
        records
            .into_iter()
            .filter(|r| match self.check(r) {
                Ok(()) => true,
                Err(rej) => {
                    tracing::debug!(target: "ingest", id = %r.id, reason = %rej, "record rejected");
                    counter!("ingest_rejected_total", "reason" => rej.reason()).increment(1);
                    false
                }
            })
            .collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::news()
    }
}

/// Parse an ISO-8601 timestamp: calendar (`2024-01-27`, `20240127`) or week
/// (`2024-W04-6`, `2024W046`) date, optionally followed by `T`/space and a
/// time of hour, minute or second precision in extended or basic form. The
/// fraction separator may be `.` or `,`. Offsets are `Z`, `±HH`, `±HHMM`,
/// `±HH:MM` or `±HH:MM:SS`; naive timestamps and bare dates are read as UTC.
/// Surrounding whitespace, signed years and second `60` are rejected.
pub fn parse_iso8601(raw: &str) -> Option<DateTime<FixedOffset>> {
    if !raw.is_ascii() {
        return None;
    }
    let (date_part, time_part) = match raw.find(|c: char| matches!(c, 'T' | 't' | ' ')) {
        Some(i) => (&raw[..i], Some(&raw[i + 1..])),
        None => (raw, None),
    };
    let date = parse_date(date_part)?;
    let (time, offset) = match time_part {
        Some(t) => parse_time_and_offset(t)?,
        None => (NaiveTime::from_hms_opt(0, 0, 0)?, FixedOffset::east_opt(0)?),
    };
    offset.from_local_datetime(&date.and_time(time)).single()
}

/// Unsigned decimal made of ASCII digits only.
fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let b = s.as_bytes();
    match (b.len(), b.get(4).copied(), b.get(5).copied()) {
        // YYYY-MM-DD
        (10, Some(b'-'), _) if b[7] == b'-' && b[5] != b'W' => NaiveDate::from_ymd_opt(
            digits(&s[..4])? as i32,
            digits(&s[5..7])?,
            digits(&s[8..])?,
        ),
        // YYYY-Www-D
        (10, Some(b'-'), Some(b'W')) if b[8] == b'-' => {
            week_date(&s[..4], &s[6..8], Some(&s[9..]))
        }
        // YYYY-Www
        (8, Some(b'-'), Some(b'W')) => week_date(&s[..4], &s[6..], None),
        // YYYYWwwD
        (8, Some(b'W'), _) => week_date(&s[..4], &s[5..7], Some(&s[7..])),
        // YYYYWww
        (7, Some(b'W'), _) => week_date(&s[..4], &s[5..], None),
        // YYYYMMDD
        (8, _, _) => NaiveDate::from_ymd_opt(
            digits(&s[..4])? as i32,
            digits(&s[4..6])?,
            digits(&s[6..])?,
        ),
        _ => None,
    }
}

fn week_date(year: &str, week: &str, day: Option<&str>) -> Option<NaiveDate> {
    let day = match day {
        Some(d) => digits(d)?,
        None => 1,
    };
    let weekday = match day {
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        7 => Weekday::Sun,
        _ => return None,
    };
    NaiveDate::from_isoywd_opt(digits(year)? as i32, digits(week)?, weekday)
}

fn parse_time_and_offset(s: &str) -> Option<(NaiveTime, FixedOffset)> {
    match s.find(|c: char| matches!(c, 'Z' | 'z' | '+' | '-')) {
        Some(i) => Some((parse_time(&s[..i])?, parse_offset(&s[i..])?)),
        None => Some((parse_time(s)?, FixedOffset::east_opt(0)?)),
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let (clock, fraction) = match s.find(|c: char| matches!(c, '.' | ',')) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let (h, m, sec) = hms(clock)?;
    let nanos = match fraction {
        // A fraction only ever follows seconds.
        Some(f) if sec.is_some() => {
            if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let kept = &f[..f.len().min(9)];
            digits(kept)? * 10u32.pow(9 - kept.len() as u32)
        }
        Some(_) => return None,
        None => 0,
    };
    // Rejects hour 24 and second 60.
    NaiveTime::from_hms_nano_opt(h, m.unwrap_or(0), sec.unwrap_or(0), nanos)
}

/// `HH`, `HH:MM`, `HH:MM:SS`, `HHMM` or `HHMMSS`.
fn hms(s: &str) -> Option<(u32, Option<u32>, Option<u32>)> {
    let b = s.as_bytes();
    match b.len() {
        2 => Some((digits(s)?, None, None)),
        4 => Some((digits(&s[..2])?, Some(digits(&s[2..])?), None)),
        5 if b[2] == b':' => Some((digits(&s[..2])?, Some(digits(&s[3..])?), None)),
        6 => Some((
            digits(&s[..2])?,
            Some(digits(&s[2..4])?),
            Some(digits(&s[4..])?),
        )),
        8 if b[2] == b':' && b[5] == b':' => Some((
            digits(&s[..2])?,
            Some(digits(&s[3..5])?),
            Some(digits(&s[6..])?),
        )),
        _ => None,
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let sign = match *s.as_bytes().first()? {
        b'Z' | b'z' if s.len() == 1 => return FixedOffset::east_opt(0),
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let (h, m, sec) = hms(&s[1..])?;
    let (m, sec) = (m.unwrap_or(0), sec.unwrap_or(0));
    if h > 23 || m > 59 || sec > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60 + sec) as i32)
}
