//! Parsed identity of a date-stamped object in the upload bucket
//!
//! Object names follow `<YYYY-MM-DD>-<name>[-<version>].<ext>`, for example
//! `2024-01-02-till_status-2.csv`. The logical `name` maps to a schema file and
//! a transform unit; a missing version is version `0`.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CommonError, Result};

/// Object name grammar
pub const OBJECT_NAME_PATTERN: &str =
    r"^(\d{4}-\d{2}-\d{2})-([a-z0-9_]+)(?:-([1-9][0-9]*))?\.([A-Za-z0-9]+)$";

/// Date format used in object names and day prefixes
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date format used for temporary table names and suffixes
pub const DATE_SUFFIX_FORMAT: &str = "%Y%m%d";

/// Parsed identity of a candidate file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Logical base name (maps to a known dataset/table)
    pub name: String,
    /// Business date the file's data belongs to
    pub date: NaiveDate,
    /// Revision counter, higher supersedes lower for the same name and date
    pub version: u32,
    /// File extension without the dot
    pub extension: String,
}

impl FileDescriptor {
    pub fn new(
        name: impl Into<String>,
        date: NaiveDate,
        version: u32,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            date,
            version,
            extension: extension.into(),
        }
    }

    /// Parse an object name into a descriptor
    pub fn parse(object_name: &str) -> Result<Self> {
        let pattern = Regex::new(OBJECT_NAME_PATTERN)
            .map_err(|e| CommonError::InvalidName(format!("bad name pattern: {}", e)))?;

        let captures = pattern
            .captures(object_name)
            .ok_or_else(|| CommonError::InvalidName(object_name.to_string()))?;

        let date = parse_date(&captures[1])?;
        let version = match captures.get(3) {
            Some(v) => v
                .as_str()
                .parse()
                .map_err(|_| CommonError::InvalidName(object_name.to_string()))?,
            None => 0,
        };

        Ok(Self {
            name: captures[2].to_string(),
            date,
            version,
            extension: captures[4].to_string(),
        })
    }

    /// Original object name, derived from name, date, version and extension
    pub fn full_name(&self) -> String {
        if self.version == 0 {
            format!(
                "{}-{}.{}",
                self.date.format(DATE_FORMAT),
                self.name,
                self.extension
            )
        } else {
            format!(
                "{}-{}-{}.{}",
                self.date.format(DATE_FORMAT),
                self.name,
                self.version,
                self.extension
            )
        }
    }

    pub fn is_csv(&self) -> bool {
        self.extension.eq_ignore_ascii_case("csv")
    }

    /// `YYYYMMDD` suffix derived from the business date
    pub fn date_suffix(&self) -> String {
        self.date.format(DATE_SUFFIX_FORMAT).to_string()
    }

    /// Value of the `table_suffix` transform parameter: `<version>-<YYYYMMDD>`
    pub fn table_suffix(&self) -> String {
        format!("{}-{}", self.version, self.date_suffix())
    }

    /// Temporary table name, scoped to (name, date)
    pub fn temporary_table_name(&self, prefix: &str) -> String {
        format!("{}{}_{}", prefix, self.name, self.date_suffix())
    }

    /// Same logical file at another revision
    pub fn with_version(&self, version: u32) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Listing prefix selecting every object of one business day
pub fn day_prefix(date: NaiveDate) -> String {
    format!("{}-", date.format(DATE_FORMAT))
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| CommonError::InvalidDate {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_versioned_name() {
        let file = FileDescriptor::parse("2024-01-02-till_status-3.csv").unwrap();
        assert_eq!(file.name, "till_status");
        assert_eq!(file.date, date(2024, 1, 2));
        assert_eq!(file.version, 3);
        assert_eq!(file.extension, "csv");
        assert_eq!(file.full_name(), "2024-01-02-till_status-3.csv");
    }

    #[test]
    fn test_parse_unversioned_name() {
        let file = FileDescriptor::parse("2024-01-02-sales.csv").unwrap();
        assert_eq!(file.version, 0);
        assert_eq!(file.full_name(), "2024-01-02-sales.csv");
    }

    #[test]
    fn test_parse_rejects_invalid_names() {
        for name in [
            "sales.csv",
            "2024-13-02-sales.csv",
            "2024-01-02-Sales.csv",
            "2024-01-02-sales-0.csv",
            "2024-01-02-sales-01.csv",
            "2024-01-02-sales",
            "2024-01-01/2024-01-02-sales.csv",
        ] {
            assert!(FileDescriptor::parse(name).is_err(), "{} should not parse", name);
        }
    }

    #[test]
    fn test_derived_names() {
        let file = FileDescriptor::new("sales", date(2024, 3, 9), 2, "csv");
        assert_eq!(file.date_suffix(), "20240309");
        assert_eq!(file.table_suffix(), "2-20240309");
        assert_eq!(file.temporary_table_name("tmp_csv_"), "tmp_csv_sales_20240309");
        assert_eq!(file.with_version(5).full_name(), "2024-03-09-sales-5.csv");
        assert!(file.is_csv());
        assert!(!FileDescriptor::new("sales", date(2024, 3, 9), 0, "json").is_csv());
    }

    #[test]
    fn test_day_prefix() {
        assert_eq!(day_prefix(date(2024, 1, 5)), "2024-01-05-");
        assert!(parse_date("2024-02-30").is_err());
    }
}
