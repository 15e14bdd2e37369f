//! Column classification and per-cell value conversion.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::error::ConversionError;

/// Semantic type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Time,
    Number,
    String,
}

/// Map a remote API type name onto a column type.
///
/// Covers both the Reporting API v4 names (`INTEGER`, `PERCENT`, ...) and the
/// Data API names (`TYPE_INTEGER`, `TYPE_SECONDS`, ...). Anything unknown is
/// treated as a string.
pub fn classify(remote_type: &str) -> ColumnType {
    match remote_type.trim() {
        "INTEGER" | "FLOAT" | "CURRENCY" | "PERCENT" => ColumnType::Number,
        "TYPE_INTEGER" | "TYPE_FLOAT" | "TYPE_CURRENCY" | "TYPE_STANDARD" | "TYPE_SECONDS"
        | "TYPE_MILLISECONDS" | "TYPE_MINUTES" | "TYPE_HOURS" | "TYPE_FEET" | "TYPE_MILES"
        | "TYPE_METERS" | "TYPE_KILOMETERS" => ColumnType::Number,
        "TIME" => ColumnType::Time,
        _ => ColumnType::String,
    }
}

/// One output column: header, position and semantic type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub header: String,
    pub index: usize,
    pub column_type: ColumnType,
}

impl ColumnDefinition {
    pub fn new(header: &str, index: usize, remote_type: &str) -> Self {
        Self {
            header: header.trim().to_string(),
            index,
            column_type: classify(remote_type),
        }
    }

    /// Convert a raw wire value into this column's typed value.
    pub fn convert(&self, raw: &str) -> Result<CellValue, ConversionError> {
        match self.column_type {
            ColumnType::Time => DateTime::parse_from_rfc3339(raw.trim())
                .map(CellValue::Time)
                .map_err(|_| ConversionError::InvalidTime {
                    column: self.header.clone(),
                    value: raw.to_string(),
                }),
            // NaN and infinities would serialize as null
            ColumnType::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(CellValue::Number)
                .ok_or_else(|| ConversionError::InvalidNumber {
                    column: self.header.clone(),
                    value: raw.to_string(),
                }),
            ColumnType::String => Ok(CellValue::String(raw.to_string())),
        }
    }
}

/// Typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Time(DateTime<FixedOffset>),
    Number(f64),
    String(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reporting_types() {
        assert_eq!(classify("INTEGER"), ColumnType::Number);
        assert_eq!(classify("PERCENT"), ColumnType::Number);
        assert_eq!(classify("TIME"), ColumnType::Time);
        assert_eq!(classify("STRING"), ColumnType::String);
        assert_eq!(classify("something-new"), ColumnType::String);
    }

    #[test]
    fn test_classify_data_api_types() {
        assert_eq!(classify("TYPE_INTEGER"), ColumnType::Number);
        assert_eq!(classify("TYPE_SECONDS"), ColumnType::Number);
        assert_eq!(classify("TYPE_CURRENCY"), ColumnType::Number);
        assert_eq!(classify("METRIC_TYPE_UNSPECIFIED"), ColumnType::String);
    }

    #[test]
    fn test_number_conversion() {
        let column = ColumnDefinition::new("ga:sessions", 1, "INTEGER");
        assert_eq!(column.convert("42").unwrap(), CellValue::Number(42.0));
        assert_eq!(column.convert("0.25").unwrap(), CellValue::Number(0.25));

        let err = column.convert("abc").unwrap_err();
        assert_eq!(
            err,
            ConversionError::InvalidNumber {
                column: "ga:sessions".to_string(),
                value: "abc".to_string(),
            }
        );
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        let column = ColumnDefinition::new("ga:bounceRate", 1, "PERCENT");
        for raw in ["NaN", "inf", "-infinity", "1e999"] {
            assert!(
                matches!(column.convert(raw), Err(ConversionError::InvalidNumber { .. })),
                "{raw} should not convert"
            );
        }
    }

    #[test]
    fn test_time_conversion_keeps_offset() {
        let column = ColumnDefinition::new("ga:dateHour", 0, "TIME");
        let value = column.convert("2024-01-01T09:00:00+09:00").unwrap();
        match value {
            CellValue::Time(t) => {
                assert_eq!(t.offset().local_minus_utc(), 9 * 3600);
                assert_eq!(t.timestamp(), 1_704_067_200);
            }
            other => panic!("expected time, got {:?}", other),
        }
        assert!(column.convert("20240101").is_err());
    }

    #[test]
    fn test_string_passes_through() {
        let column = ColumnDefinition::new(" ga:country ", 0, "STRING");
        assert_eq!(column.header, "ga:country");
        assert_eq!(
            column.convert(" United States").unwrap(),
            CellValue::String(" United States".to_string())
        );
    }
}
