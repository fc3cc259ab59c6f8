//! Price history and curve query payloads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an instrument either by numeric code or by its reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentRef {
    /// Numeric instrument code
    Id(i32),
    /// Instrument reference text
    Reference(String),
}

impl From<i32> for InstrumentRef {
    fn from(id: i32) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for InstrumentRef {
    fn from(reference: &str) -> Self {
        Self::Reference(reference.to_string())
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Reference(reference) => f.write_str(reference),
        }
    }
}

/// One day of instrument price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Observation date
    pub date: NaiveDate,
    /// Opening price
    #[serde(default)]
    pub first: Option<f64>,
    /// High
    #[serde(default)]
    pub high: Option<f64>,
    /// Low
    #[serde(default)]
    pub low: Option<f64>,
    /// Closing price
    #[serde(default)]
    pub last: Option<f64>,
    /// Theoretical price
    #[serde(default)]
    pub theoretical: Option<f64>,
    /// Bid
    #[serde(default)]
    pub bid: Option<f64>,
    /// Ask
    #[serde(default)]
    pub ask: Option<f64>,
    /// Traded volume
    #[serde(default)]
    pub volume: Option<f64>,
}

impl PricePoint {
    /// Column titles of a rendered price history table.
    pub const HEADERS: [&'static str; 9] = [
        "Date",
        "First",
        "High",
        "Low",
        "Last",
        "Theoretical",
        "Bid",
        "Ask",
        "Volume",
    ];

    /// Creates a point with no prices.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self {
            date,
            first: None,
            high: None,
            low: None,
            last: None,
            theoretical: None,
            bid: None,
            ask: None,
            volume: None,
        }
    }

    /// Returns the numeric columns in table order, absent values as zero.
    #[must_use]
    pub fn row(&self) -> (NaiveDate, [f64; 8]) {
        let values = [
            self.first,
            self.high,
            self.low,
            self.last,
            self.theoretical,
            self.bid,
            self.ask,
            self.volume,
        ]
        .map(|v| v.unwrap_or(0.0));
        (self.date, values)
    }
}

/// One point of an interest rate curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Tenor label such as `3M` or `10Y`
    pub tenor: String,
    /// Maturity date of the point, if fixed
    #[serde(default)]
    pub maturity: Option<NaiveDate>,
    /// Rate at the point
    #[serde(default)]
    pub rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_defaults_to_zero() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let point = PricePoint {
            last: Some(10.5),
            volume: Some(200.0),
            ..PricePoint::new(date)
        };

        let (row_date, values) = point.row();
        assert_eq!(row_date, date);
        assert_eq!(values, [0.0, 0.0, 0.0, 10.5, 0.0, 0.0, 0.0, 200.0]);
        assert_eq!(PricePoint::HEADERS.len(), values.len() + 1);
    }

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let point: PricePoint = serde_json::from_str(r#"{"date":"2024-01-02","last":3.0}"#).unwrap();
        assert_eq!(point.last, Some(3.0));
        assert_eq!(point.bid, None);
    }

    #[test]
    fn test_instrument_ref_display() {
        assert_eq!(InstrumentRef::from(42).to_string(), "42");
        assert_eq!(InstrumentRef::from("FR0000120271").to_string(), "FR0000120271");
    }
}
