//! LookML rendering for a freshly loaded table.
//!
//! Rendering performs no I/O: identical inputs give byte-identical documents.

use common::model::column::ColumnDescriptor;
use common::model::join::{JoinConfig, JoinType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

static INVALID_FIELD_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").unwrap());

/// Everything the view document is derived from.
#[derive(Debug, Clone)]
pub struct ViewSource<'a> {
    pub table_id: &'a str,
    pub columns: &'a [ColumnDescriptor],
    pub project_id: &'a str,
    pub dataset_id: &'a str,
    pub view_label: &'a str,
    pub joins: &'a JoinConfig,
}

enum FieldKind {
    Dimension(&'static str),
    Time { datatype: &'static str, with_time: bool },
}

fn field_kind(data_type: &str) -> FieldKind {
    match data_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" | "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
            FieldKind::Dimension("number")
        }
        "BOOLEAN" | "BOOL" => FieldKind::Dimension("yesno"),
        "DATE" => FieldKind::Time {
            datatype: "date",
            with_time: false,
        },
        "TIMESTAMP" => FieldKind::Time {
            datatype: "timestamp",
            with_time: true,
        },
        "DATETIME" => FieldKind::Time {
            datatype: "datetime",
            with_time: true,
        },
        _ => FieldKind::Dimension("string"),
    }
}

/// LookML field name for a column or a join key.
pub fn field_name(raw: &str) -> String {
    INVALID_FIELD_CHARS
        .replace_all(&raw.trim().to_lowercase(), "_")
        .into_owned()
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn generate_lookml(source: &ViewSource<'_>) -> String {
    let mut out = String::new();
    render_view(&mut out, source);
    if source.joins.has_complete_pairs() {
        if let Some(explore) = source.joins.explore_name() {
            out.push('\n');
            render_join(&mut out, source, explore);
        }
    }
    out
}

fn render_view(out: &mut String, source: &ViewSource<'_>) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "view: {} {{", source.table_id);
    let _ = writeln!(
        out,
        "  sql_table_name: `{}.{}.{}` ;;",
        source.project_id, source.dataset_id, source.table_id
    );
    let _ = writeln!(out, "  label: {}", quoted(source.view_label));

    let mut names = Vec::with_capacity(source.columns.len());
    for column in source.columns {
        let name = field_name(&column.column_name);
        out.push('\n');
        match field_kind(&column.data_type) {
            FieldKind::Dimension(kind) => {
                let _ = writeln!(out, "  dimension: {} {{", name);
                let _ = writeln!(out, "    type: {}", kind);
            }
            FieldKind::Time {
                datatype,
                with_time,
            } => {
                let timeframes = if with_time {
                    "raw, time, date, week, month, quarter, year"
                } else {
                    "raw, date, week, month, quarter, year"
                };
                let _ = writeln!(out, "  dimension_group: {} {{", name);
                let _ = writeln!(out, "    type: time");
                let _ = writeln!(out, "    timeframes: [{}]", timeframes);
                if !with_time {
                    let _ = writeln!(out, "    convert_tz: no");
                }
                let _ = writeln!(out, "    datatype: {}", datatype);
            }
        }
        let _ = writeln!(out, "    sql: ${{TABLE}}.{} ;;", column.column_name);
        let _ = writeln!(out, "  }}");
        names.push(name);
    }

    let count = if names.iter().any(|n| n == "count") {
        "count_rows"
    } else {
        "count"
    };
    out.push('\n');
    let _ = writeln!(out, "  measure: {} {{", count);
    let _ = writeln!(out, "    type: count");
    let _ = writeln!(out, "  }}");
    let _ = writeln!(out, "}}");
}

/// Reference to a field of the new view; time columns are only addressable
/// through a timeframe, so they join on `_raw`.
fn join_key(source: &ViewSource<'_>, from_field: &str) -> String {
    let name = field_name(from_field);
    let is_time = source.columns.iter().any(|column| {
        field_name(&column.column_name) == name
            && matches!(field_kind(&column.data_type), FieldKind::Time { .. })
    });
    if is_time {
        format!("{}.{}_raw", source.table_id, name)
    } else {
        format!("{}.{}", source.table_id, name)
    }
}

fn render_join(out: &mut String, source: &ViewSource<'_>, explore: &str) {
    let table_id = source.table_id;
    let joins = source.joins;
    let join_type = joins.join_type;
    let _ = writeln!(out, "explore: +{} {{", explore);
    let _ = writeln!(out, "  join: {} {{", table_id);
    let _ = writeln!(out, "    type: {}", join_type.as_lookml());

    if join_type != JoinType::Cross {
        let conditions = joins
            .complete_pairs()
            .map(|pair| {
                let to = pair.to_field.trim();
                let target = if to.contains('.') {
                    to.to_string()
                } else {
                    format!("{}.{}", explore, to)
                };
                format!("${{{}}} = ${{{}}}", join_key(source, &pair.from_field), target)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let _ = writeln!(out, "    sql_on: {} ;;", conditions);
    }

    let _ = writeln!(out, "    relationship: {}", join_type.relationship());
    let _ = writeln!(out, "  }}");
    let _ = writeln!(out, "}}");
}
