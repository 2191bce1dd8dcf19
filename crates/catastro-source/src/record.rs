use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{RecordError, geometry::Point};

/// Names of the attributes the search core interprets.
///
/// Everything else in a record is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Unique property identifier (catastro number)
    pub id_field: String,
    pub latitude_field: String,
    pub longitude_field: String,
    /// Sale amount, numeric
    pub sale_price_field: String,
    /// Sale timestamp, epoch milliseconds or `YYYY-MM-DD`
    pub sale_date_field: String,
    /// Land area in square metres
    pub cabida_field: String,
    pub municipality_field: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            id_field: "CATASTRO".to_string(),
            latitude_field: "INSIDE_Y".to_string(),
            longitude_field: "INSIDE_X".to_string(),
            sale_price_field: "SALESAMT".to_string(),
            sale_date_field: "SALESDTTM".to_string(),
            cabida_field: "CABIDA".to_string(),
            municipality_field: "MUNICIPIO".to_string(),
        }
    }
}

/// One property record as returned by the remote service.
///
/// `id` and `position` are lifted out of the attribute map on construction; the
/// map itself keeps every field, including those two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub position: Option<Point>,
    pub attributes: Map<String, Value>,
}

impl RawRecord {
    /// Build a record from a raw attribute map.
    ///
    /// The identifier is mandatory and may be a string or a number. A position is
    /// derived only when both coordinate fields are present and non-null.
    pub fn from_attributes(
        attributes: Map<String, Value>,
        schema: &RecordSchema,
    ) -> Result<Self, RecordError> {
        let id = match attributes.get(&schema.id_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RecordError::MissingIdentifier(schema.id_field.clone())),
        };

        let lat = coordinate(&attributes, &schema.latitude_field)?;
        let lon = coordinate(&attributes, &schema.longitude_field)?;
        let position = lat.zip(lon).map(|(lat, lon)| Point::new(lat, lon));

        Ok(Self {
            id,
            position,
            attributes,
        })
    }

    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field).filter(|v| !v.is_null())
    }

    /// Numeric view of an attribute; numeric strings are accepted.
    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.attribute(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.attribute(field).and_then(Value::as_str)
    }

    /// Set an attribute, returning the record for chaining.
    #[must_use]
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }
}

fn coordinate(attributes: &Map<String, Value>, field: &str) -> Result<Option<f64>, RecordError> {
    match attributes.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64().filter(|v| v.is_finite())),
        Some(other) => Err(RecordError::InvalidCoordinate {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}
