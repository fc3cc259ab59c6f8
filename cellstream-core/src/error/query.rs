//! Domain faults returned by query operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::InstrumentRef;

/// Expected, typed failure of a query.
///
/// The display text is the human-readable outcome shown to users.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum QueryError {
    /// No portfolio with this id exists.
    #[error("Portfolio {portfolio_id} not found")]
    PortfolioNotFound {
        /// Requested portfolio
        portfolio_id: i32,
    },

    /// The portfolio exists but has not finished loading.
    #[error("Portfolio {portfolio_id} is not loaded")]
    PortfolioNotLoaded {
        /// Requested portfolio
        portfolio_id: i32,
    },

    /// The instrument is unknown.
    #[error("Instrument {instrument} not found")]
    InstrumentNotFound {
        /// Requested instrument
        instrument: InstrumentRef,
    },

    /// No curve matches the currency, family and reference.
    #[error("Curve not found for {currency}/{family}/{reference}")]
    CurveNotFound {
        /// Curve currency
        currency: String,
        /// Curve family
        family: String,
        /// Curve reference
        reference: String,
    },
}
