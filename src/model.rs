//! Domain types shared by the enumerator, report fetcher and normalizer.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::ApiVersion;
use crate::error::QueryError;

/// Report page size used when the query does not set one (Reporting API v4).
pub const V3_REPORT_PAGE_SIZE: u32 = 10_000;

/// Report page size used when the query does not set one (Data API).
pub const V4_REPORT_PAGE_SIZE: u32 = 100_000;

/// One node of the account → property → profile hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    pub id: String,
    pub display_name: String,
    pub parent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

impl ResourceNode {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: parent_id.into(),
            timezone: None,
            service_tier: None,
        }
    }
}

/// GA4 account with its properties, as returned by `accountSummaries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account: String,
    pub display_name: String,
    pub property_summaries: Vec<PropertySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySummary {
    pub property: String,
    pub display_name: String,
    pub parent: String,
}

/// Shape of the frames produced for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Table,
    TimeSeries,
    Realtime,
}

impl QueryMode {
    /// Parse the wire form; both "time series" and "time_series" are accepted.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw.trim() {
            "table" => Ok(Self::Table),
            "time series" | "time_series" | "timeseries" => Ok(Self::TimeSeries),
            "realtime" => Ok(Self::Realtime),
            other => Err(QueryError::UnknownMode(other.to_string())),
        }
    }
}

/// Dashboard time range, RFC3339 on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

/// Incoming data query exactly as the host sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryModel {
    pub account_id: String,
    pub web_property_id: String,
    pub profile_id: String,
    pub ref_id: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub time_range: Option<TimeRange>,
    pub metrics: Vec<String>,
    pub time_dimension: String,
    pub dimensions: Vec<String>,
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub offset: Option<u64>,
    #[serde(alias = "useNextpage")]
    pub use_next_page: Option<bool>,
    pub timezone: String,
    #[serde(alias = "filtersExpression")]
    pub filter_expression: Option<String>,
    pub mode: Option<String>,
}

/// Validated, immutable query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub account_id: String,
    pub property_id: String,
    pub profile_id: String,
    pub start_date: String,
    pub end_date: String,
    pub ref_id: String,
    pub metrics: Vec<String>,
    pub time_dimension: String,
    /// Full dimension list sent to the API; the time dimension comes first
    /// when one is set.
    pub dimensions: Vec<String>,
    pub page_size: u32,
    pub page_token: Option<String>,
    pub offset: u64,
    pub use_next_page: bool,
    pub timezone: Tz,
    pub filter_expression: Option<String>,
    pub mode: QueryMode,
}

impl QueryModel {
    /// Parse a query from its JSON form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, QueryError> {
        serde_json::from_value(value).map_err(|e| QueryError::Malformed(e.to_string()))
    }

    /// Validate the query for the given API generation and resolve dates,
    /// timezone, mode and paging defaults.
    pub fn into_spec(self, version: ApiVersion) -> Result<QuerySpec, QueryError> {
        if version == ApiVersion::V3 {
            require("accountId", &self.account_id)?;
        }
        require("webPropertyId", &self.web_property_id)?;
        if version == ApiVersion::V3 {
            require("profileId", &self.profile_id)?;
        }

        if self.metrics.is_empty() && self.dimensions.is_empty() {
            return Err(QueryError::NoDimensionsOrMetrics);
        }

        let time_dimension = self.time_dimension.trim().to_string();
        let mode = match self.mode.as_deref() {
            Some(raw) if !raw.trim().is_empty() => QueryMode::parse(raw)?,
            _ if !time_dimension.is_empty() => QueryMode::TimeSeries,
            _ => QueryMode::Table,
        };
        if mode == QueryMode::TimeSeries && time_dimension.is_empty() {
            return Err(QueryError::MissingTimeDimension);
        }

        let timezone = parse_timezone(&self.timezone)?;
        let (start_date, end_date) = resolve_dates(
            self.time_range.as_ref(),
            self.start_date,
            self.end_date,
            timezone,
        )?;

        let mut dimensions = Vec::with_capacity(self.dimensions.len() + 1);
        if !time_dimension.is_empty() {
            dimensions.push(time_dimension.clone());
        }
        dimensions.extend(
            self.dimensions
                .into_iter()
                .filter(|d| !d.trim().is_empty() && *d != time_dimension),
        );

        let default_page_size = match version {
            ApiVersion::V3 => V3_REPORT_PAGE_SIZE,
            ApiVersion::V4 => V4_REPORT_PAGE_SIZE,
        };

        Ok(QuerySpec {
            account_id: self.account_id,
            property_id: self.web_property_id,
            profile_id: self.profile_id,
            start_date,
            end_date,
            ref_id: self.ref_id,
            metrics: self.metrics,
            time_dimension,
            dimensions,
            page_size: self.page_size.filter(|s| *s > 0).unwrap_or(default_page_size),
            page_token: self.page_token.filter(|t| !t.is_empty()),
            offset: self.offset.unwrap_or(0),
            use_next_page: self.use_next_page.unwrap_or(true),
            timezone,
            filter_expression: self.filter_expression.filter(|f| !f.trim().is_empty()),
            mode,
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), QueryError> {
    if value.trim().is_empty() {
        Err(QueryError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Resolve an IANA timezone name; empty means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz, QueryError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| QueryError::UnknownTimezone(name.to_string()))
}

fn resolve_dates(
    time_range: Option<&TimeRange>,
    start_date: Option<String>,
    end_date: Option<String>,
    timezone: Tz,
) -> Result<(String, String), QueryError> {
    if let Some(range) = time_range {
        let from = format_in_zone(&range.from, timezone)?;
        let to = format_in_zone(&range.to, timezone)?;
        return Ok((from, to));
    }

    match (start_date, end_date) {
        (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => {
            if let (Ok(s), Ok(e)) = (
                NaiveDate::parse_from_str(&start, "%Y-%m-%d"),
                NaiveDate::parse_from_str(&end, "%Y-%m-%d"),
            ) {
                if s > e {
                    return Err(QueryError::InvalidTimeRange(format!(
                        "{} is after {}",
                        start, end
                    )));
                }
            }
            Ok((start, end))
        }
        _ => Err(QueryError::InvalidTimeRange(
            "either timeRange or startDate/endDate is required".to_string(),
        )),
    }
}

fn format_in_zone(raw: &str, timezone: Tz) -> Result<String, QueryError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| QueryError::InvalidTimeRange(format!("{}: {}", raw, e)))?;
    Ok(parsed.with_timezone(&timezone).format("%Y-%m-%d").to_string())
}

/// Header of one value column in a report: its name and the API's type name
/// (e.g. `INTEGER`, `TYPE_FLOAT`, `TIME`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricHeader {
    pub name: String,
    pub type_name: String,
}

impl MetricHeader {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One record of a report, values still in their wire string form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    pub dimension_values: Vec<String>,
    pub metric_values: Vec<String>,
}

impl RawRow {
    pub fn new(dimension_values: Vec<String>, metric_values: Vec<String>) -> Self {
        Self {
            dimension_values,
            metric_values,
        }
    }
}

/// A stitched report: all pages of one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawReport {
    pub dimension_headers: Vec<String>,
    pub metric_headers: Vec<MetricHeader>,
    pub rows: Vec<RawRow>,
    /// Total rows the API reports as available.
    pub row_count: u64,
    /// Continuation token of the last page, when one remains.
    pub next_page_token: Option<String>,
}

/// Kind of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    Dimension,
    Metric,
}

/// A selectable dimension or metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub attributes: CatalogAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAttributes {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub attribute_type: Option<AttributeType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, rename = "uiName", skip_serializing_if = "String::is_empty")]
    pub ui_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaced_by: String,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, attribute_type: AttributeType, ui_name: &str) -> Self {
        Self {
            id: id.into(),
            kind: String::new(),
            attributes: CatalogAttributes {
                attribute_type: Some(attribute_type),
                ui_name: ui_name.to_string(),
                ..CatalogAttributes::default()
            },
        }
    }

    /// Deprecated or superseded entries are hidden from the catalog.
    pub fn is_retired(&self) -> bool {
        self.attributes.status == "DEPRECATED" || !self.attributes.replaced_by.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_query() -> serde_json::Value {
        json!({
            "accountId": "1234",
            "webPropertyId": "UA-1234-1",
            "profileId": "5678",
            "refId": "A",
            "metrics": ["ga:sessions"],
            "timeDimension": "ga:dateHour",
            "dimensions": ["ga:country"],
            "timezone": "Asia/Seoul",
            "timeRange": {"from": "2024-01-01T15:30:00Z", "to": "2024-01-02T10:00:00Z"}
        })
    }

    #[test]
    fn test_time_dimension_is_prepended() {
        let spec = QueryModel::from_json(base_query())
            .unwrap()
            .into_spec(ApiVersion::V3)
            .unwrap();

        assert_eq!(spec.dimensions, vec!["ga:dateHour", "ga:country"]);
        assert_eq!(spec.mode, QueryMode::TimeSeries);
        assert!(spec.use_next_page);
        assert_eq!(spec.page_size, V3_REPORT_PAGE_SIZE);
    }

    #[test]
    fn test_dates_are_formatted_in_query_timezone() {
        let spec = QueryModel::from_json(base_query())
            .unwrap()
            .into_spec(ApiVersion::V3)
            .unwrap();

        // 15:30 UTC is already the next day in Seoul.
        assert_eq!(spec.start_date, "2024-01-02");
        assert_eq!(spec.end_date, "2024-01-02");
        assert_eq!(spec.timezone, chrono_tz::Asia::Seoul);
    }

    #[test]
    fn test_v3_requires_all_identifiers() {
        let mut query = base_query();
        query["profileId"] = json!("");
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V3)
            .unwrap_err();
        assert_eq!(err, QueryError::MissingField("profileId"));
    }

    #[test]
    fn test_v4_only_requires_property() {
        let mut query = base_query();
        query["accountId"] = json!("");
        query["profileId"] = json!("");
        let spec = QueryModel::from_json(query.clone())
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap();
        assert_eq!(spec.page_size, V4_REPORT_PAGE_SIZE);

        query["webPropertyId"] = json!("");
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap_err();
        assert_eq!(err, QueryError::MissingField("webPropertyId"));
    }

    #[test]
    fn test_rejects_query_without_dimensions_and_metrics() {
        let mut query = base_query();
        query["metrics"] = json!([]);
        query["dimensions"] = json!([]);
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap_err();
        assert_eq!(err, QueryError::NoDimensionsOrMetrics);
    }

    #[test]
    fn test_time_series_requires_time_dimension() {
        let mut query = base_query();
        query["timeDimension"] = json!("");
        query["mode"] = json!("time series");
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap_err();
        assert_eq!(err, QueryError::MissingTimeDimension);
    }

    #[test]
    fn test_mode_defaults_to_table_without_time_dimension() {
        let mut query = base_query();
        query["timeDimension"] = json!("");
        let spec = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap();
        assert_eq!(spec.mode, QueryMode::Table);
        assert_eq!(spec.dimensions, vec!["ga:country"]);
    }

    #[test]
    fn test_unknown_timezone_is_a_validation_error() {
        let mut query = base_query();
        query["timezone"] = json!("Mars/Olympus");
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap_err();
        assert_eq!(err, QueryError::UnknownTimezone("Mars/Olympus".to_string()));
    }

    #[test]
    fn test_explicit_dates_and_legacy_field_names() {
        let query = json!({
            "webPropertyId": "123",
            "metrics": ["activeUsers"],
            "startDate": "yesterday",
            "endDate": "today",
            "useNextpage": false,
            "filtersExpression": "ga:country==US",
            "mode": "realtime"
        });
        let spec = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap();
        assert_eq!(spec.start_date, "yesterday");
        assert!(!spec.use_next_page);
        assert_eq!(spec.filter_expression.as_deref(), Some("ga:country==US"));
        assert_eq!(spec.mode, QueryMode::Realtime);
        assert_eq!(spec.timezone, Tz::UTC);
    }

    #[test]
    fn test_reversed_explicit_dates_are_rejected() {
        let query = json!({
            "webPropertyId": "123",
            "metrics": ["activeUsers"],
            "startDate": "2024-02-01",
            "endDate": "2024-01-01"
        });
        let err = QueryModel::from_json(query)
            .unwrap()
            .into_spec(ApiVersion::V4)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidTimeRange(_)));
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = QueryModel::from_json(json!({"metrics": "not-a-list"})).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_catalog_retired_items() {
        let mut item = CatalogItem::new("ga:users", AttributeType::Metric, "Users");
        assert!(!item.is_retired());
        item.attributes.status = "DEPRECATED".to_string();
        assert!(item.is_retired());

        let mut replaced = CatalogItem::new("ga:visits", AttributeType::Metric, "Visits");
        replaced.attributes.replaced_by = "ga:sessions".to_string();
        assert!(replaced.is_retired());
    }
}
