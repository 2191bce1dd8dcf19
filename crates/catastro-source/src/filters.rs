//! Attribute predicates over property records.
//!
//! [`SearchFilters`] is the user-facing shape (price, sale date, land area,
//! municipality). It lowers to a list of [`FieldPredicate`]s over named fields,
//! which is what both local filtering and remote pushdown operate on.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{RawRecord, RecordSchema};

/// Inclusive range with optional bounds on either side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for RangeFilter<T> {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
        }
    }
}

impl<T: PartialOrd> RangeFilter<T> {
    #[must_use]
    pub const fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.min.as_ref().is_none_or(|min| value >= min)
            && self.max.as_ref().is_none_or(|max| value <= max)
    }
}

/// Optional attribute bounds applied identically in every search mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub sale_price: RangeFilter<f64>,
    pub sale_date: RangeFilter<NaiveDate>,
    /// Land area ("cabida") in square metres
    pub cabida: RangeFilter<f64>,
    pub municipality: Option<String>,
}

impl SearchFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sale_price(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.sale_price = RangeFilter::new(min, max);
        self
    }

    pub fn with_sale_date(mut self, min: Option<NaiveDate>, max: Option<NaiveDate>) -> Self {
        self.sale_date = RangeFilter::new(min, max);
        self
    }

    pub fn with_cabida(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.cabida = RangeFilter::new(min, max);
        self
    }

    pub fn with_municipality(mut self, municipality: impl Into<String>) -> Self {
        self.municipality = Some(municipality.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sale_price.is_unbounded()
            && self.sale_date.is_unbounded()
            && self.cabida.is_unbounded()
            && self.municipality.is_none()
    }

    /// Lower to generic predicates using the given field names.
    #[must_use]
    pub fn predicates(&self, schema: &RecordSchema) -> Vec<FieldPredicate> {
        let mut predicates = Vec::new();
        if !self.sale_price.is_unbounded() {
            predicates.push(FieldPredicate::NumberRange {
                field: schema.sale_price_field.clone(),
                range: self.sale_price,
            });
        }
        if !self.sale_date.is_unbounded() {
            predicates.push(FieldPredicate::DateRange {
                field: schema.sale_date_field.clone(),
                range: self.sale_date,
            });
        }
        if !self.cabida.is_unbounded() {
            predicates.push(FieldPredicate::NumberRange {
                field: schema.cabida_field.clone(),
                range: self.cabida,
            });
        }
        if let Some(municipality) = &self.municipality {
            predicates.push(FieldPredicate::Equals {
                field: schema.municipality_field.clone(),
                value: municipality.clone(),
            });
        }
        predicates
    }

    /// Whether a record satisfies every configured bound.
    #[must_use]
    pub fn matches(&self, record: &RawRecord, schema: &RecordSchema) -> bool {
        self.predicates(schema).iter().all(|p| p.matches(record))
    }
}

/// A predicate over one named record field.
///
/// A record without a value for the field never matches.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    NumberRange {
        field: String,
        range: RangeFilter<f64>,
    },
    DateRange {
        field: String,
        range: RangeFilter<NaiveDate>,
    },
    /// Case-insensitive text equality
    Equals { field: String, value: String },
}

impl FieldPredicate {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::NumberRange { field, .. }
            | Self::DateRange { field, .. }
            | Self::Equals { field, .. } => field,
        }
    }

    #[must_use]
    pub fn matches(&self, record: &RawRecord) -> bool {
        match self {
            Self::NumberRange { field, range } => {
                record.number(field).is_some_and(|v| range.contains(&v))
            }
            Self::DateRange { field, range } => record
                .attribute(field)
                .and_then(date_value)
                .is_some_and(|d| range.contains(&d)),
            Self::Equals { field, value } => record
                .text(field)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(value.trim())),
        }
    }
}

/// Epoch milliseconds (UTC calendar date) or an ISO `YYYY-MM-DD` prefix.
fn date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        Value::String(s) => s
            .get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()),
        _ => None,
    }
}
