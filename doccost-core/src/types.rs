//! Core types for DocCost

use crate::CostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Scalar value types that have a fixed size in the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Number,
    Integer,
    String,
    Date,
    #[serde(rename = "longstring")]
    LongString,
}

impl ScalarType {
    /// All scalar types, in settings order
    pub const ALL: [ScalarType; 5] = [
        ScalarType::Number,
        ScalarType::Integer,
        ScalarType::String,
        ScalarType::Date,
        ScalarType::LongString,
    ];

    /// Parse from a JSON schema type or format name
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "number" => Some(ScalarType::Number),
            "integer" => Some(ScalarType::Integer),
            "string" => Some(ScalarType::String),
            "date" => Some(ScalarType::Date),
            "longstring" => Some(ScalarType::LongString),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Number => "number",
            ScalarType::Integer => "integer",
            ScalarType::String => "string",
            ScalarType::Date => "date",
            ScalarType::LongString => "longstring",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Single value
    Scalar(ScalarType),
    /// Embedded document
    Object(Vec<Field>),
    /// Array of scalars or of embedded documents
    Array(ArrayItems),
}

/// Items of an array field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayItems {
    Scalar(ScalarType),
    Object(Vec<Field>),
}

/// A named field of a collection schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    /// Create a scalar field
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Scalar(ty),
        }
    }

    /// Create an embedded document field
    pub fn object(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Object(fields),
        }
    }

    /// Create an array field
    pub fn array(name: impl Into<String>, items: ArrayItems) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Array(items),
        }
    }
}

/// Ordered field definitions of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Collection name
    pub name: String,
    /// Top-level fields, in declaration order
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Flattened leaf properties.
    ///
    /// Embedded documents and arrays of documents contribute their own
    /// leaves, arrays of scalars contribute their item type. A name seen
    /// twice keeps its first position and takes the last type.
    pub fn properties(&self) -> Vec<(String, ScalarType)> {
        let mut out: Vec<(String, ScalarType)> = Vec::new();
        collect_properties(&self.fields, &mut out);
        out
    }

    /// Check if a flattened property exists
    pub fn has_property(&self, key: &str) -> bool {
        self.properties().iter().any(|(name, _)| name == key)
    }

    /// Comma separated property names, for error messages
    pub fn property_list(&self) -> String {
        self.properties()
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn collect_properties(fields: &[Field], out: &mut Vec<(String, ScalarType)>) {
    for field in fields {
        match &field.field_type {
            FieldType::Object(nested) | FieldType::Array(ArrayItems::Object(nested)) => {
                collect_properties(nested, out)
            }
            FieldType::Scalar(ty) | FieldType::Array(ArrayItems::Scalar(ty)) => {
                match out.iter_mut().find(|(name, _)| name == &field.name) {
                    Some(entry) => entry.1 = *ty,
                    None => out.push((field.name.clone(), *ty)),
                }
            }
        }
    }
}

/// Fraction of records matching a predicate, kept as an exact ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelectivity")]
pub struct Selectivity {
    matching: u64,
    out_of: u64,
}

impl Selectivity {
    /// Every record matches
    pub const ALL: Selectivity = Selectivity {
        matching: 1,
        out_of: 1,
    };

    /// Denominator used for decimal fractions
    const FRACTION_SCALE: u64 = 1_000_000;

    /// `matching / out_of`, `None` if the ratio is not in `[0, 1]`
    pub fn new(matching: u64, out_of: u64) -> Option<Self> {
        if out_of == 0 || matching > out_of {
            return None;
        }
        Some(Self { matching, out_of })
    }

    /// One record in `n` matches; `n == 0` behaves like `n == 1`
    pub fn one_in(n: u64) -> Self {
        Self {
            matching: 1,
            out_of: n.max(1),
        }
    }

    /// Decimal fraction rounded to a millionth
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return None;
        }
        let matching = (fraction * Self::FRACTION_SCALE as f64).round() as u64;
        Self::new(matching, Self::FRACTION_SCALE)
    }

    /// Number of matching records out of `total`, rounded down
    pub fn apply(&self, total: u64) -> u64 {
        (total as u128 * self.matching as u128 / self.out_of as u128) as u64
    }

    pub fn as_f64(&self) -> f64 {
        self.matching as f64 / self.out_of as f64
    }
}

#[derive(Deserialize)]
struct RawSelectivity {
    matching: u64,
    out_of: u64,
}

impl TryFrom<RawSelectivity> for Selectivity {
    type Error = CostError;

    fn try_from(raw: RawSelectivity) -> Result<Self, Self::Error> {
        Selectivity::new(raw.matching, raw.out_of).ok_or_else(|| {
            CostError::invalid_input(
                "selectivity",
                format!("{}/{} is not a fraction in [0, 1]", raw.matching, raw.out_of),
            )
        })
    }
}

impl Default for Selectivity {
    fn default() -> Self {
        Selectivity::ALL
    }
}

impl fmt::Display for Selectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.matching, self.out_of)
    }
}

/// Time, carbon and price of moving data for a query
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryCost {
    /// Transfer time in seconds
    pub time_seconds: f64,
    /// Carbon footprint in grams of CO2
    pub carbon_gco2: f64,
    /// Price in dollars
    pub price_usd: f64,
}

impl QueryCost {
    /// Repeat this cost `times` times
    pub fn repeated(&self, times: u64) -> Self {
        let n = times as f64;
        Self {
            time_seconds: self.time_seconds * n,
            carbon_gco2: self.carbon_gco2 * n,
            price_usd: self.price_usd * n,
        }
    }
}

impl Add for QueryCost {
    type Output = QueryCost;

    fn add(self, other: QueryCost) -> QueryCost {
        QueryCost {
            time_seconds: self.time_seconds + other.time_seconds,
            carbon_gco2: self.carbon_gco2 + other.carbon_gco2,
            price_usd: self.price_usd + other.price_usd,
        }
    }
}
