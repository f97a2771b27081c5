//! Document, collection and database size estimation

use crate::schema::Database;
use crate::{ArrayItems, CostError, Field, FieldType, Result, Schema, Settings};
use serde::Serialize;
use std::collections::BTreeSet;

/// Estimated size of one document of `schema`.
///
/// Every field costs a key plus its value. Embedded documents count their
/// own fields; arrays count `avg_<field>` items.
pub fn document_size(schema: &Schema, settings: &Settings) -> Result<u64> {
    fields_size(&schema.fields, settings)
}

fn fields_size(fields: &[Field], settings: &Settings) -> Result<u64> {
    fields.iter().try_fold(0u64, |acc, field| {
        acc.checked_add(field_size(field, settings)?)
            .ok_or(CostError::Overflow("document size"))
    })
}

fn field_size(field: &Field, settings: &Settings) -> Result<u64> {
    let value = match &field.field_type {
        FieldType::Scalar(ty) => settings.value_size(*ty),
        FieldType::Object(nested) => fields_size(nested, settings)?,
        FieldType::Array(items) => {
            let item = match items {
                ArrayItems::Scalar(ty) => settings.value_size(*ty),
                ArrayItems::Object(nested) => fields_size(nested, settings)?,
            };
            item.checked_mul(settings.average_length(&field.name))
                .ok_or(CostError::Overflow("array size"))?
        }
    };
    settings
        .key_size
        .checked_add(value)
        .ok_or(CostError::Overflow("field size"))
}

/// Total bytes of `record_count` documents of `schema`
pub fn compute_database_size(schema: &Schema, record_count: u64, settings: &Settings) -> Result<u64> {
    document_size(schema, settings)?
        .checked_mul(record_count)
        .ok_or(CostError::Overflow("collection size"))
}

/// Size of a document restricted to the flattened properties in `keys`,
/// saturating at `u64::MAX`
pub fn projected_document_size<'a, I>(schema: &Schema, keys: I, settings: &Settings) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let keys: BTreeSet<&str> = keys.into_iter().collect();
    schema
        .properties()
        .into_iter()
        .filter(|(name, _)| keys.contains(name.as_str()))
        .map(|(_, ty)| settings.key_size.saturating_add(settings.value_size(ty)))
        .fold(0u64, u64::saturating_add)
}

/// Size breakdown of one collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSize {
    pub collection: String,
    pub document_bytes: u64,
    pub documents: u64,
    pub collection_bytes: u64,
}

/// Size breakdown of a whole database design
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSizeReport {
    pub database: String,
    pub collections: Vec<CollectionSize>,
    pub total_bytes: u64,
}

/// Size every collection of `database` using the configured document counts
pub fn database_report(database: &Database, settings: &Settings) -> Result<DatabaseSizeReport> {
    let mut collections = Vec::new();
    let mut total_bytes = 0u64;

    for schema in database.schemas() {
        let documents = settings.documents(&schema.name)?;
        let size = collection_size(schema, documents, settings)?;
        total_bytes = total_bytes
            .checked_add(size.collection_bytes)
            .ok_or(CostError::Overflow("database size"))?;
        collections.push(size);
    }

    Ok(DatabaseSizeReport {
        database: database.name().to_string(),
        collections,
        total_bytes,
    })
}

/// Size one collection holding `documents` documents
pub fn collection_size(schema: &Schema, documents: u64, settings: &Settings) -> Result<CollectionSize> {
    Ok(CollectionSize {
        collection: schema.name.clone(),
        document_bytes: document_size(schema, settings)?,
        documents,
        collection_bytes: compute_database_size(schema, documents, settings)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarType;

    fn stock() -> Schema {
        Schema::new(
            "Stock",
            vec![
                Field::scalar("IDP", ScalarType::Integer),
                Field::scalar("IDW", ScalarType::Integer),
                Field::scalar("quantity", ScalarType::Integer),
                Field::scalar("location", ScalarType::String),
            ],
        )
    }

    fn product() -> Schema {
        Schema::new(
            "Product",
            vec![
                Field::scalar("IDP", ScalarType::Integer),
                Field::scalar("name", ScalarType::String),
                Field::scalar("description", ScalarType::LongString),
                Field::array("categories", ArrayItems::Scalar(ScalarType::String)),
                Field::object(
                    "supplier",
                    vec![
                        Field::scalar("IDS", ScalarType::Integer),
                        Field::scalar("SIRET", ScalarType::Integer),
                    ],
                ),
                Field::array("stocks", ArrayItems::Object(stock().fields)),
            ],
        )
    }

    #[test]
    fn test_flat_document_size() {
        let settings = Settings::default();
        // 3 * (12 + 8) + (12 + 80)
        assert_eq!(document_size(&stock(), &settings).unwrap(), 152);
    }

    #[test]
    fn test_nested_document_size() {
        let settings = Settings::default();
        let expected = 20 // IDP
            + 92 // name
            + 212 // description
            + 12 + 2 * 80 // categories
            + 12 + 2 * 20 // supplier
            + 12 + 200 * 152; // stocks
        assert_eq!(document_size(&product(), &settings).unwrap(), expected);
    }

    #[test]
    fn test_database_size_linear_in_records() {
        let settings = Settings::default();
        let schema = product();
        let one = compute_database_size(&schema, 1, &settings).unwrap();
        for n in [0u64, 1, 7, 1_000, 100_000, 4_000_000_000] {
            assert_eq!(compute_database_size(&schema, n, &settings).unwrap(), one * n);
        }
        let a = compute_database_size(&schema, 1_234, &settings).unwrap();
        let b = compute_database_size(&schema, 5_678, &settings).unwrap();
        assert_eq!(
            compute_database_size(&schema, 1_234 + 5_678, &settings).unwrap(),
            a + b
        );
    }

    #[test]
    fn test_database_size_overflow() {
        let settings = Settings::default();
        assert!(matches!(
            compute_database_size(&stock(), u64::MAX, &settings),
            Err(CostError::Overflow(_))
        ));
    }

    #[test]
    fn test_projected_document_size() {
        let settings = Settings::default();
        let schema = product();
        assert_eq!(projected_document_size(&schema, ["IDP", "name"], &settings), 112);
        // nested leaves are addressable, unknown keys contribute nothing
        assert_eq!(projected_document_size(&schema, ["IDW", "nope"], &settings), 20);
        assert_eq!(projected_document_size(&schema, ["IDP", "IDP"], &settings), 20);
    }

    #[test]
    fn test_projected_document_size_saturates() {
        let settings = Settings {
            key_size: u64::MAX - 1,
            ..Settings::default()
        };
        let schema = stock();
        assert_eq!(projected_document_size(&schema, ["IDP"], &settings), u64::MAX);
        assert_eq!(
            projected_document_size(&schema, ["IDP", "IDW", "location"], &settings),
            u64::MAX
        );
        assert!(matches!(
            document_size(&schema, &settings),
            Err(CostError::Overflow(_))
        ));
    }

    #[test]
    fn test_database_report() {
        let settings = Settings::default();
        let db = Database::new("db1", vec![stock(), product()]);
        let report = database_report(&db, &settings).unwrap();

        assert_eq!(report.collections.len(), 2);
        let stock_size = report
            .collections
            .iter()
            .find(|c| c.collection == "Stock")
            .unwrap();
        assert_eq!(stock_size.documents, 20_000_000);
        assert_eq!(stock_size.collection_bytes, 152 * 20_000_000);
        assert_eq!(
            report.total_bytes,
            report.collections.iter().map(|c| c.collection_bytes).sum::<u64>()
        );
    }
}
