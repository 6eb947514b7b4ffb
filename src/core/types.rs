use super::{DataType, Result, SentryError, Value};
use std::collections::BTreeMap;

/// A persisted row keyed by column name.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(SentryError::TypeMismatch(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(SentryError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Checks every cell against its column and every non-null column
    /// against the record. Unknown columns are rejected.
    pub fn validate_record(&self, table: &str, record: &Record) -> Result<()> {
        for (name, value) in record {
            let column = self.get_column(name).ok_or_else(|| {
                SentryError::ColumnNotFound(name.clone(), table.to_string())
            })?;
            column.validate(value)?;
        }

        for column in self.columns.iter().filter(|col| !col.nullable) {
            if !record.contains_key(&column.name) {
                column.validate(&Value::Null)?;
            }
        }

        Ok(())
    }
}
