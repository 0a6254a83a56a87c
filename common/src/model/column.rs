use serde::{Deserialize, Serialize};

/// A single column of a materialized warehouse table.
///
/// Produced by schema introspection in physical column order and consumed by the
/// LookML generator. `data_type` is the engine-native type name exactly as the
/// warehouse reports it (`STRING`, `INTEGER`, `FLOAT`, `TIMESTAMP`, ...).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub column_name: String,
    pub data_type: String,
}

impl ColumnDescriptor {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
        }
    }
}
