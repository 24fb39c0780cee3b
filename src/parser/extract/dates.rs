use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static AVAILABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)disponibiliza[çc][ãa]o\s*:?[^\d\n]{0,30}(\d{1,2})/(\d{1,2})/(\d{4})").unwrap()
});

static PUBLICATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)publica[çc][ãa]o\s*:?[^\d\n]{0,30}(\d{1,2})/(\d{1,2})/(\d{4})").unwrap()
});

pub fn availability_date(text: &str) -> Option<NaiveDate> {
    first_date(&AVAILABILITY_RE, text)
}

pub fn publication_date(text: &str) -> Option<NaiveDate> {
    first_date(&PUBLICATION_RE, text)
}

fn first_date(re: &Regex, text: &str) -> Option<NaiveDate> {
    re.captures_iter(text).find_map(|caps| {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marked_dates() {
        let text = "Data de Disponibilização: 03/10/2024\nData de Publicação: 04/10/2024";
        assert_eq!(availability_date(text), NaiveDate::from_ymd_opt(2024, 10, 3));
        assert_eq!(publication_date(text), NaiveDate::from_ymd_opt(2024, 10, 4));
    }

    #[test]
    fn invalid_calendar_date_is_skipped() {
        assert_eq!(publication_date("Publicação: 31/02/2024"), None);
        assert_eq!(publication_date("sem data"), None);
    }
}
