//! Birthday book: the collaborator behind `!birthday`.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex_lite::Regex;
use seedkeeper_core::error::MemoryError;
use seedkeeper_memory::JsonRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})$").expect("date pattern compiles"));
static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?$").expect("date pattern compiles")
});
static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]+)$").expect("date pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthdayEntry {
    pub month: u32,
    pub day: u32,
    pub set_by: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingBirthday {
    pub user_id: String,
    pub month: u32,
    pub day: u32,
    pub days_until: i64,
}

#[async_trait]
pub trait BirthdayBook: Send + Sync {
    async fn set(
        &self,
        user_id: &str,
        month: u32,
        day: u32,
        set_by: &str,
    ) -> Result<(), MemoryError>;

    /// Returns whether an entry existed.
    async fn remove(&self, user_id: &str) -> Result<bool, MemoryError>;

    async fn get(&self, user_id: &str) -> Option<BirthdayEntry>;

    async fn all(&self) -> BTreeMap<String, BirthdayEntry>;

    /// Birthdays within `days` of `today`, soonest first.
    async fn upcoming(&self, today: NaiveDate, days: i64) -> Vec<UpcomingBirthday> {
        let mut found: Vec<UpcomingBirthday> = self
            .all()
            .await
            .into_iter()
            .filter_map(|(user_id, entry)| {
                let days_until = days_until(today, entry.month, entry.day)?;
                (days_until <= days).then_some(UpcomingBirthday {
                    user_id,
                    month: entry.month,
                    day: entry.day,
                    days_until,
                })
            })
            .collect();
        found.sort_by(|a, b| a.days_until.cmp(&b.days_until).then(a.user_id.cmp(&b.user_id)));
        found
    }

    async fn reload(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// Days from `today` to the next occurrence of month/day. Feb 29 falls on
/// Mar 1 in common years.
pub fn days_until(today: NaiveDate, month: u32, day: u32) -> Option<i64> {
    let on = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .or_else(|| {
                (month == 2 && day == 29)
                    .then(|| NaiveDate::from_ymd_opt(year, 3, 1))
                    .flatten()
            })
    };
    let this_year = on(today.year())?;
    let next = if this_year < today {
        on(today.year() + 1)?
    } else {
        this_year
    };
    Some((next - today).num_days())
}

fn month_number(name: &str) -> Option<u32> {
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.to_lowercase().starts_with(name))
        .map(|i| i as u32 + 1)
}

/// Parse `06-15`, `6/15`, `June 15`, `jun 15th`, or `15 June`.
pub fn parse_month_day(input: &str) -> Result<(u32, u32), String> {
    let text = input.trim().to_lowercase();
    let parsed = if let Some(c) = NUMERIC.captures(&text) {
        c[1].parse().ok().zip(c[2].parse().ok())
    } else if let Some(c) = MONTH_DAY.captures(&text) {
        month_number(&c[1]).zip(c[2].parse().ok())
    } else if let Some(c) = DAY_MONTH.captures(&text) {
        month_number(&c[2]).zip(c[1].parse().ok())
    } else {
        None
    };

    let Some((month, day)) = parsed else {
        return Err("Couldn't read that date. Try `06-15` or `June 15`.".into());
    };
    // 2024 is a leap year, so Feb 29 is accepted.
    if NaiveDate::from_ymd_opt(2024, month, day).is_none() {
        return Err(format!("{month:02}-{day:02} isn't a real date."));
    }
    Ok((month, day))
}

pub fn format_month_day(month: u32, day: u32) -> String {
    let name = MONTHS
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Month");
    format!("{name} {day}")
}

/// `birthdays.json`: user id → entry.
pub struct JsonBirthdayBook {
    record: JsonRecord<BTreeMap<String, BirthdayEntry>>,
}

impl JsonBirthdayBook {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self {
            record: JsonRecord::load(path),
        }
    }
}

#[async_trait]
impl BirthdayBook for JsonBirthdayBook {
    async fn set(
        &self,
        user_id: &str,
        month: u32,
        day: u32,
        set_by: &str,
    ) -> Result<(), MemoryError> {
        let entry = BirthdayEntry {
            month,
            day,
            set_by: set_by.to_string(),
            added_at: Utc::now(),
        };
        self.record
            .update(|book| {
                book.insert(user_id.to_string(), entry);
            })
            .await
    }

    async fn remove(&self, user_id: &str) -> Result<bool, MemoryError> {
        if !self.record.read(|book| book.contains_key(user_id)).await {
            return Ok(false);
        }
        self.record
            .update(|book| book.remove(user_id).is_some())
            .await
    }

    async fn get(&self, user_id: &str) -> Option<BirthdayEntry> {
        self.record.read(|book| book.get(user_id).cloned()).await
    }

    async fn all(&self) -> BTreeMap<String, BirthdayEntry> {
        self.record.get().await
    }

    async fn reload(&self) -> Result<(), MemoryError> {
        self.record.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn accepts_common_formats() {
        assert_eq!(parse_month_day("06-15"), Ok((6, 15)));
        assert_eq!(parse_month_day("6/15"), Ok((6, 15)));
        assert_eq!(parse_month_day("June 15"), Ok((6, 15)));
        assert_eq!(parse_month_day("sept 3rd"), Ok((9, 3)));
        assert_eq!(parse_month_day("15 Jun"), Ok((6, 15)));
        assert_eq!(parse_month_day("Feb 29"), Ok((2, 29)));
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(parse_month_day("02-30").is_err());
        assert!(parse_month_day("13-01").is_err());
        assert!(parse_month_day("ju 5").is_err());
        assert!(parse_month_day("someday").is_err());
    }

    #[test]
    fn days_until_wraps_to_next_year() {
        let today = date(2025, 12, 30);
        assert_eq!(days_until(today, 12, 30), Some(0));
        assert_eq!(days_until(today, 1, 2), Some(3));
        // 2026 is a common year, so Feb 29 lands on Mar 1.
        assert_eq!(days_until(date(2026, 2, 1), 2, 29), Some(28));
    }

    #[tokio::test]
    async fn upcoming_is_sorted_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let book = JsonBirthdayBook::load(dir.path().join("birthdays.json"));
        book.set("a", 7, 10, "a").await.unwrap();
        book.set("b", 7, 2, "b").await.unwrap();
        book.set("c", 11, 1, "c").await.unwrap();

        let upcoming = book.upcoming(date(2025, 7, 1), 14).await;
        let ids: Vec<&str> = upcoming.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(upcoming[0].days_until, 1);

        assert!(book.remove("b").await.unwrap());
        assert!(!book.remove("b").await.unwrap());

        let reopened = JsonBirthdayBook::load(dir.path().join("birthdays.json"));
        assert_eq!(reopened.all().await.len(), 2);
    }

    #[test]
    fn formats_month_names() {
        assert_eq!(format_month_day(6, 15), "June 15");
    }
}
