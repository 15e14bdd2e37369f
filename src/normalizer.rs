//! Report-to-frame transformation.
//!
//! Time-series mode splits a report into one frame per distinct combination
//! of non-time dimension values, sorts each by time, and surrounds every
//! observation with zero-valued boundary rows one bucket before and after it
//! (unless that instant is already occupied). Table and realtime modes
//! flatten dimensions into leading string columns of a single frame.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

use crate::column::ColumnDefinition;
use crate::frame::{Frame, FrameBuilder};
use crate::model::{RawReport, RawRow};

/// Metric value of a synthesized boundary row.
pub const BOUNDARY_VALUE: &str = "0";

/// Step between two consecutive time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Infer the step from the time dimension name. Both `ga:`-prefixed
    /// (v3) and bare (v4) names are recognised; anything else steps hourly.
    pub fn from_time_dimension(name: &str) -> Self {
        match name.trim().trim_start_matches("ga:") {
            "dateHourMinute" => Granularity::Minute,
            "dateHour" => Granularity::Hour,
            "date" | "firstSessionDate" => Granularity::Day,
            _ => Granularity::Hour,
        }
    }

    pub fn next(self, t: DateTime<Tz>) -> DateTime<Tz> {
        self.shift(t, 1)
    }

    pub fn prev(self, t: DateTime<Tz>) -> DateTime<Tz> {
        self.shift(t, -1)
    }

    fn shift(self, t: DateTime<Tz>, n: i64) -> DateTime<Tz> {
        match self {
            Granularity::Minute => t + Duration::minutes(n),
            Granularity::Hour => t + Duration::hours(n),
            // Calendar days, so midnight stays midnight across DST changes.
            Granularity::Day => {
                let local = t.naive_local() + Duration::days(n);
                resolve_local(&t.timezone(), local)
            }
        }
    }
}

/// Parse a compact time dimension value (`YYYYMMDD`, `YYYYMMDDHH` or
/// `YYYYMMDDHHMM`) as local time in `tz`.
pub fn parse_time_value(raw: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    let raw = raw.trim();
    if raw.len() > 12 || raw.len() < 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{:0<12}", raw);
    let naive = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M").ok()?;
    Some(resolve_local(tz, naive))
}

/// Map a local wall-clock time onto an instant. Ambiguous times take the
/// earlier instant; times skipped by a DST jump are read as UTC.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&local)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}

/// Resolve a timezone name, degrading to UTC when it is unknown.
fn resolve_timezone(name: &str) -> Tz {
    let name = name.trim();
    if name.is_empty() {
        return Tz::UTC;
    }
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::error!(timezone = %name, "unknown timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Join the non-time dimension values of a row into its group key.
pub fn group_key(non_time_dimensions: &[String]) -> String {
    non_time_dimensions.join("|")
}

/// Rows of a single dimension group, keyed by unix timestamp.
#[derive(Debug, Default)]
struct Group {
    rows: BTreeMap<i64, (DateTime<Tz>, Vec<String>)>,
    warnings: Vec<String>,
}

impl Group {
    /// Insert a real observation. A later row at the same instant replaces
    /// an earlier one.
    fn insert_real(&mut self, time: DateTime<Tz>, metrics: Vec<String>) {
        self.rows.insert(time.timestamp(), (time, metrics));
    }

    /// Insert a zero-valued boundary row unless the instant is occupied.
    fn insert_boundary(&mut self, time: DateTime<Tz>, metric_count: usize) {
        self.rows
            .entry(time.timestamp())
            .or_insert_with(|| (time, vec![BOUNDARY_VALUE.to_string(); metric_count]));
    }

    fn pad(&mut self, time: DateTime<Tz>, granularity: Granularity, metric_count: usize) {
        self.insert_boundary(granularity.prev(time), metric_count);
        self.insert_boundary(granularity.next(time), metric_count);
    }
}

/// Time-series transformation with the granularity inferred from the first
/// dimension header.
pub fn normalize(report: &RawReport, ref_id: &str, timezone: &str) -> Vec<Frame> {
    let granularity = report
        .dimension_headers
        .first()
        .map(|name| Granularity::from_time_dimension(name))
        .unwrap_or(Granularity::Hour);
    normalize_with(report, ref_id, timezone, granularity)
}

/// Time-series transformation: one frame per dimension group, each sorted
/// by time with boundary rows around every observation.
pub fn normalize_with(
    report: &RawReport,
    ref_id: &str,
    timezone: &str,
    granularity: Granularity,
) -> Vec<Frame> {
    if report.rows.is_empty() {
        return Vec::new();
    }

    let tz = resolve_timezone(timezone);
    let metric_count = report.metric_headers.len();
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for row in &report.rows {
        let Some((time_value, other_dimensions)) = row.dimension_values.split_first() else {
            tracing::warn!(ref_id, "row without a time dimension skipped");
            continue;
        };
        let group = groups.entry(group_key(other_dimensions)).or_default();

        let Some(time) = parse_time_value(time_value, &tz) else {
            tracing::error!(ref_id, value = %time_value, "failed to parse time dimension");
            group
                .warnings
                .push(format!("unparseable time dimension value {:?}", time_value));
            continue;
        };

        group.insert_real(time, row.metric_values.clone());
        group.pad(time, granularity, metric_count);
    }

    let time_header = report
        .dimension_headers
        .first()
        .map(String::as_str)
        .unwrap_or("time");
    let mut columns = Vec::with_capacity(metric_count + 1);
    columns.push(ColumnDefinition::new(time_header, 0, "TIME"));
    columns.extend(
        report
            .metric_headers
            .iter()
            .enumerate()
            .map(|(i, h)| ColumnDefinition::new(&h.name, i + 1, &h.type_name)),
    );

    groups
        .into_iter()
        .map(|(key, group)| {
            let mut builder = FrameBuilder::new(ref_id, &key, columns.clone());
            for warning in group.warnings {
                builder.warn(warning);
            }
            for (time, metrics) in group.rows.into_values() {
                let mut values = Vec::with_capacity(metrics.len() + 1);
                values.push(time.to_rfc3339());
                values.extend(metrics);
                builder.push_row(&values);
            }
            builder.finish()
        })
        .collect()
}

/// Table/realtime transformation: dimensions become leading string columns
/// of a single frame, rows keep their order.
pub fn flatten(report: &RawReport, ref_id: &str) -> Frame {
    let dimension_count = report.dimension_headers.len();
    let mut columns: Vec<ColumnDefinition> = report
        .dimension_headers
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnDefinition::new(name, i, "STRING"))
        .collect();
    columns.extend(
        report
            .metric_headers
            .iter()
            .enumerate()
            .map(|(i, h)| ColumnDefinition::new(&h.name, dimension_count + i, &h.type_name)),
    );

    let mut builder = FrameBuilder::new(ref_id, "", columns);
    for RawRow {
        dimension_values,
        metric_values,
    } in &report.rows
    {
        let mut values: Vec<&str> = Vec::with_capacity(dimension_count + metric_values.len());
        values.extend(
            (0..dimension_count).map(|i| dimension_values.get(i).map(String::as_str).unwrap_or("")),
        );
        values.extend(metric_values.iter().map(String::as_str));
        builder.push_row(&values);
    }
    builder.finish()
}
