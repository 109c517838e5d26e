//! Declarative row filters
//!
//! A `Filter` is a conjunction of equality / null checks on named columns.
//! The same description is compiled to a SQL condition for the relational
//! backend and evaluated against the serialized row for the in-memory one,
//! so both backends select exactly the same rows.

use crate::errors::{AppError, Result};
use sea_orm::{ColumnTrait, Condition, EntityTrait};
use serde::Serialize;
use std::str::FromStr;

/// Scalar value a column is compared against
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Conjunction of column conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, FieldValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field = value` (or `field IS NULL` for `FieldValue::Null`)
    pub fn eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|(f, _)| f.as_str())
    }

    /// Compile to a sea-orm condition over entity `E`'s columns
    pub fn to_condition<E: EntityTrait>(&self) -> Result<Condition> {
        let mut condition = Condition::all();

        for (field, value) in &self.conditions {
            let column = E::Column::from_str(field)
                .map_err(|_| unknown_field(field))?;

            condition = condition.add(match value {
                FieldValue::Int(v) => column.eq(*v),
                FieldValue::Text(v) => column.eq(v.clone()),
                FieldValue::Bool(v) => column.eq(*v),
                FieldValue::Null => column.is_null(),
            });
        }

        Ok(condition)
    }

    /// Evaluate against a row by its serialized column names
    pub fn matches<R: Serialize>(&self, row: &R) -> Result<bool> {
        if self.conditions.is_empty() {
            return Ok(true);
        }

        let serialized = serde_json::to_value(row)?;
        let object = serialized.as_object().ok_or_else(|| AppError::Internal {
            message: "row did not serialize to an object".to_string(),
        })?;

        for (field, expected) in &self.conditions {
            let actual = object.get(field).ok_or_else(|| unknown_field(field))?;

            let matched = match (expected, actual) {
                (FieldValue::Int(v), serde_json::Value::Number(n)) => n.as_i64() == Some(*v),
                (FieldValue::Text(v), serde_json::Value::String(s)) => s == v,
                (FieldValue::Bool(v), serde_json::Value::Bool(b)) => b == v,
                (FieldValue::Null, serde_json::Value::Null) => true,
                _ => false,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn unknown_field(field: &str) -> AppError {
    AppError::validation(format!("unknown filter field: {}", field), Some(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DocumentEntity, DocumentRow};
    use chrono::Utc;

    fn row() -> DocumentRow {
        DocumentRow {
            id: 4,
            filename: "a.txt".into(),
            original_name: "A.txt".into(),
            file_hash: "00".repeat(32),
            s3_url: "file:///tmp/a".into(),
            file_size: 12,
            user_id: "u1".into(),
            status: "uploaded".into(),
            is_standard: false,
            extracted_text: None,
            metadata: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_matches_all_conditions() {
        let filter = Filter::new()
            .eq("user_id", "u1")
            .eq("is_standard", false)
            .eq("id", 4)
            .eq("extracted_text", FieldValue::Null);
        assert!(filter.matches(&row()).unwrap());
    }

    #[test]
    fn test_rejects_on_any_mismatch() {
        let filter = Filter::new().eq("user_id", "u1").eq("status", "processed");
        assert!(!filter.matches(&row()).unwrap());

        let filter = Filter::new().eq("file_size", "12");
        assert!(!filter.matches(&row()).unwrap());
    }

    #[test]
    fn test_unknown_field_is_validation_error_on_both_paths() {
        let filter = Filter::new().eq("owner", "u1");
        assert!(matches!(filter.matches(&row()), Err(AppError::Validation { .. })));
        assert!(matches!(
            filter.to_condition::<DocumentEntity>(),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn test_option_values_map_to_null() {
        let none: Option<&str> = None;
        assert_eq!(FieldValue::from(none), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(3)), FieldValue::Int(3));
    }
}
