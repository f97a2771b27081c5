//! Collection schemas - JSON schema parsing and the on-disk catalog

mod catalog;

pub use catalog::{Catalog, Database};

use crate::{ArrayItems, CostError, Field, FieldType, Result, ScalarType, Schema};
use serde_json::{Map, Value};
use std::path::Path;

/// Parse a JSON schema document (`{"properties": {...}}`) into a [`Schema`]
pub fn parse_schema(name: &str, json: &Value) -> Result<Schema> {
    let properties = json
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(name, "missing 'properties' object"))?;

    Ok(Schema::new(name, parse_properties(name, properties)?))
}

/// Read and parse one `<Collection>.json` file; the collection takes the file stem
pub fn load_schema_file(path: &Path) -> Result<Schema> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let text = std::fs::read_to_string(path)?;
    let json: Value = serde_json::from_str(&text)?;
    parse_schema(&name, &json)
}

fn parse_properties(collection: &str, properties: &Map<String, Value>) -> Result<Vec<Field>> {
    properties
        .iter()
        .map(|(name, prop)| parse_field(collection, name, prop))
        .collect()
}

fn parse_field(collection: &str, name: &str, prop: &Value) -> Result<Field> {
    let ty = type_name(collection, name, prop)?;

    let field_type = match ty {
        "object" => FieldType::Object(nested_fields(collection, prop)?),
        "array" => {
            let items = prop
                .get("items")
                .ok_or_else(|| invalid(collection, format!("array '{}' has no 'items'", name)))?;
            if type_name(collection, name, items)? == "object" {
                FieldType::Array(ArrayItems::Object(nested_fields(collection, items)?))
            } else {
                FieldType::Array(ArrayItems::Scalar(scalar_type(collection, name, items)?))
            }
        }
        _ => FieldType::Scalar(scalar_type(collection, name, prop)?),
    };

    Ok(Field {
        name: name.to_string(),
        field_type,
    })
}

fn nested_fields(collection: &str, prop: &Value) -> Result<Vec<Field>> {
    match prop.get("properties").and_then(Value::as_object) {
        Some(properties) => parse_properties(collection, properties),
        None => Ok(Vec::new()),
    }
}

fn type_name<'a>(collection: &str, name: &str, prop: &'a Value) -> Result<&'a str> {
    prop.get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(collection, format!("property '{}' has no 'type'", name)))
}

/// Scalar type of a property; a string's `format` refines its type when known
fn scalar_type(collection: &str, name: &str, prop: &Value) -> Result<ScalarType> {
    let ty = type_name(collection, name, prop)?;

    if ty == "string" {
        if let Some(refined) = prop
            .get("format")
            .and_then(Value::as_str)
            .and_then(ScalarType::from_name)
        {
            return Ok(refined);
        }
    }

    ScalarType::from_name(ty).ok_or_else(|| {
        invalid(
            collection,
            format!("property '{}' has unsupported type '{}'", name, ty),
        )
    })
}

fn invalid(collection: &str, reason: impl Into<String>) -> CostError {
    CostError::InvalidSchema {
        collection: collection.to_string(),
        reason: reason.into(),
    }
}
