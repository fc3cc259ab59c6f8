//! Value, status and market data types.
//!
//! - [`CellValue`] / [`ValueUpdate`] - values pushed to subscribed clients
//! - [`ServiceStatus`] - readiness of the distribution source
//! - [`PositionFilter`] - which positions a portfolio query returns
//! - [`PricePoint`] / [`CurvePoint`] / [`InstrumentRef`] - query payloads

mod market;
mod status;
mod value;

pub use market::{CurvePoint, InstrumentRef, PricePoint};
pub use status::{PositionFilter, ServiceStatus};
pub use value::{CellValue, ValueUpdate};
