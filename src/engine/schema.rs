//! Column metadata and name resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

use super::expr::ColumnRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    List(Box<DataType>),
    /// Type of an expression whose type is only known at runtime.
    Any,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => f.write_str("Boolean"),
            DataType::Int64 => f.write_str("Int64"),
            DataType::Float64 => f.write_str("Float64"),
            DataType::Utf8 => f.write_str("Utf8"),
            DataType::List(inner) => write!(f, "List<{inner}>"),
            DataType::Any => f.write_str("Any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Table name or alias the column belongs to, if any.
    pub qualifier: Option<String>,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Sets the qualifier of every column, as a `FROM t AS alias` does.
    pub fn qualified(&self, qualifier: &str) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .map(|f| Field {
                    qualifier: Some(qualifier.to_string()),
                    ..f.clone()
                })
                .collect(),
        }
    }

    pub fn join(&self, other: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Schema { fields }
    }

    /// Resolves a column reference to its position.
    pub fn index_of(&self, column: &ColumnRef) -> Result<usize, QueryError> {
        let mut found = self.fields.iter().enumerate().filter(|(_, f)| {
            f.name == column.name
                && match &column.qualifier {
                    Some(q) => f.qualifier.as_deref() == Some(q.as_str()),
                    None => true,
                }
        });
        match (found.next(), found.next()) {
            (Some((i, _)), None) => Ok(i),
            (Some(_), Some(_)) => Err(QueryError::AmbiguousColumn(column.to_string())),
            (None, _) => Err(QueryError::UnknownColumn {
                column: column.to_string(),
                available: format!(
                    "[{}]",
                    self.fields
                        .iter()
                        .map(Field::qualified_name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    pub fn index_of_name(&self, name: &str) -> Result<usize, QueryError> {
        self.index_of(&ColumnRef::parse(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let left = Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("language", DataType::Int64, false),
        ])
        .qualified("s");
        let right = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ])
        .qualified("l");
        left.join(&right)
    }

    #[test]
    fn resolves_qualified_and_unique_names() {
        let schema = schema();
        assert_eq!(schema.index_of_name("language").unwrap(), 1);
        assert_eq!(schema.index_of_name("l.id").unwrap(), 2);
        assert_eq!(schema.index_of_name("name").unwrap(), 3);
    }

    #[test]
    fn reports_ambiguous_and_unknown_columns() {
        let schema = schema();
        assert_eq!(
            schema.index_of_name("id"),
            Err(QueryError::AmbiguousColumn("id".into()))
        );
        match schema.index_of_name("rating") {
            Err(QueryError::UnknownColumn { column, available }) => {
                assert_eq!(column, "rating");
                assert!(available.contains("s.language"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
