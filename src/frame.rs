//! Output tables handed back to the dashboard host.

use serde::Serialize;

use crate::column::{CellValue, ColumnDefinition, ColumnType};

/// One typed column of a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// One entry per row; `None` where the cell failed conversion.
    pub values: Vec<Option<CellValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameMeta {
    pub warnings: Vec<String>,
}

/// A table of typed columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub ref_id: String,
    pub name: String,
    pub fields: Vec<Field>,
    pub meta: FrameMeta,
}

impl Frame {
    pub fn row_count(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builds a frame row by row, converting every cell through its column
/// definition. Failed cells become nulls and leave a warning behind.
pub struct FrameBuilder {
    frame: Frame,
    columns: Vec<ColumnDefinition>,
}

impl FrameBuilder {
    /// `group` is the dimension group key; it names the frame and prefixes
    /// display names. An empty group names the frame after `ref_id`.
    pub fn new(ref_id: &str, group: &str, columns: Vec<ColumnDefinition>) -> Self {
        let name = if group.is_empty() {
            ref_id.to_string()
        } else {
            group.to_string()
        };
        let fields = columns
            .iter()
            .map(|column| Field {
                name: column.header.clone(),
                display_name: if group.is_empty() {
                    column.header.clone()
                } else {
                    format!("{}|{}", group, column.header)
                },
                column_type: column.column_type,
                values: Vec::new(),
            })
            .collect();

        Self {
            frame: Frame {
                ref_id: ref_id.to_string(),
                name,
                fields,
                meta: FrameMeta::default(),
            },
            columns,
        }
    }

    /// Append one row of raw values, in column order. Missing trailing
    /// values become nulls.
    pub fn push_row<S: AsRef<str>>(&mut self, values: &[S]) {
        for (index, (column, field)) in self
            .columns
            .iter()
            .zip(self.frame.fields.iter_mut())
            .enumerate()
        {
            let cell = match values.get(index) {
                Some(raw) => match column.convert(raw.as_ref()) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(error = %e, "frame cell conversion failed");
                        self.frame.meta.warnings.push(e.to_string());
                        None
                    }
                },
                None => None,
            };
            field.values.push(cell);
        }
    }

    /// Attach a warning that is not tied to a single cell.
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.frame.meta.warnings.push(warning.into());
    }

    pub fn finish(self) -> Frame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("ga:date", 0, "TIME"),
            ColumnDefinition::new("ga:sessions", 1, "INTEGER"),
        ]
    }

    #[test]
    fn test_invalid_number_is_skipped_with_one_warning() {
        let mut builder = FrameBuilder::new("A", "", columns());
        builder.push_row(&["2024-01-01T00:00:00Z", "abc"]);
        builder.push_row(&["2024-01-02T00:00:00Z", "3"]);
        let frame = builder.finish();

        assert_eq!(frame.row_count(), 2);
        assert_eq!(frame.meta.warnings.len(), 1);
        assert!(frame.meta.warnings[0].contains("abc"));

        let sessions = frame.field("ga:sessions").unwrap();
        assert_eq!(sessions.values[0], None);
        assert_eq!(sessions.values[1], Some(CellValue::Number(3.0)));
    }

    #[test]
    fn test_nan_cell_is_nulled_with_a_warning() {
        let mut builder = FrameBuilder::new("A", "", columns());
        builder.push_row(&["2024-01-01T00:00:00Z", "NaN"]);
        let frame = builder.finish();

        assert_eq!(frame.meta.warnings.len(), 1);
        assert!(frame.meta.warnings[0].contains("NaN"));
        assert_eq!(frame.field("ga:sessions").unwrap().values[0], None);
    }

    #[test]
    fn test_group_names_frame_and_prefixes_display_names() {
        let frame = FrameBuilder::new("A", "US|Chrome", columns()).finish();
        assert_eq!(frame.name, "US|Chrome");
        assert_eq!(frame.ref_id, "A");
        assert_eq!(frame.fields[1].display_name, "US|Chrome|ga:sessions");
    }

    #[test]
    fn test_ungrouped_frame_is_named_after_ref_id() {
        let frame = FrameBuilder::new("B", "", columns()).finish();
        assert_eq!(frame.name, "B");
        assert_eq!(frame.fields[0].display_name, "ga:date");
        assert_eq!(frame.row_count(), 0);
    }

    #[test]
    fn test_short_rows_are_padded_with_nulls() {
        let mut builder = FrameBuilder::new("A", "", columns());
        builder.push_row(&["2024-01-01T00:00:00Z"]);
        let frame = builder.finish();
        assert_eq!(frame.fields[1].values, vec![None]);
        assert!(frame.meta.warnings.is_empty());
    }

    #[test]
    fn test_frame_serializes_for_the_host() {
        let mut builder = FrameBuilder::new("A", "", columns());
        builder.push_row(&["2024-01-01T00:00:00Z", "5"]);
        let json = serde_json::to_value(builder.finish()).unwrap();

        assert_eq!(json["refId"], "A");
        assert_eq!(json["fields"][0]["type"], "time");
        assert_eq!(json["fields"][1]["values"][0], 5.0);
        assert_eq!(json["meta"]["warnings"], serde_json::json!([]));
    }
}
