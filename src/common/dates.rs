// src/common/dates.rs

use chrono::{Datelike, Months, NaiveDate, TimeDelta, Utc};

// "Hoje" da automação é sempre a data UTC
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Chave de data no formato `YYYY-MM-DD` (usada nos IDs determinísticos das tarefas).
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Chave de mês no formato `YYYY-MM` (documentos de resumo mensal).
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub fn parse_date_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

// Satura nos limites do calendário em vez de entrar em pânico
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(TimeDelta::days(days)).unwrap_or(date)
}

pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}

/// Aniversário "cai hoje"? Nascidos em 29/02 comemoram em 28/02 nos anos não bissextos.
pub fn is_birthday(birth_date: NaiveDate, today: NaiveDate) -> bool {
    if birth_date.month() == today.month() && birth_date.day() == today.day() {
        return true;
    }
    let today_is_leap = NaiveDate::from_ymd_opt(today.year(), 2, 29).is_some();
    birth_date.month() == 2
        && birth_date.day() == 29
        && !today_is_leap
        && today.month() == 2
        && today.day() == 28
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    #[test]
    fn keys_are_zero_padded() {
        assert_eq!(date_key(d("2024-03-05")), "2024-03-05");
        assert_eq!(month_key(d("2024-03-05")), "2024-03");
    }

    #[test]
    fn leap_day_birthdays_fall_back_to_feb_28() {
        let born = d("2000-02-29");
        assert!(is_birthday(born, d("2023-02-28")));
        assert!(!is_birthday(born, d("2024-02-28")));
        assert!(is_birthday(born, d("2024-02-29")));
        assert!(is_birthday(d("1990-03-15"), d("2024-03-15")));
        assert!(!is_birthday(d("1990-03-15"), d("2024-03-16")));
    }
}
