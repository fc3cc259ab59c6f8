//! Seam between the distribution server and the computation source.

use async_trait::async_trait;
use cellstream_core::error::QueryError;
use cellstream_core::key::SubscriptionKey;
use cellstream_core::types::{CurvePoint, InstrumentRef, PositionFilter, PricePoint, ServiceStatus};
use chrono::NaiveDate;

/// Source of values and answers to domain queries.
///
/// The key hooks run while the server holds its subscription lock, so they
/// are called in the same order as the subscription changes that caused
/// them. They must return quickly and must not call back into the server.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    /// Whether the source can currently serve data.
    fn service_status(&self) -> ServiceStatus;

    /// `key` gained its first subscriber.
    fn on_key_live(&self, key: &SubscriptionKey) {
        let _ = key;
    }

    /// `key` lost its last subscriber.
    fn on_key_idle(&self, key: &SubscriptionKey) {
        let _ = key;
    }

    /// Asks the source to load positions.
    async fn load_positions(&self) {}

    /// Asks the source to recompute values.
    async fn request_calculate(&self) {}

    /// Position ids of a portfolio.
    async fn get_positions(
        &self,
        portfolio_id: i32,
        filter: PositionFilter,
    ) -> Result<Vec<i32>, QueryError>;

    /// Price history of an instrument between `start` and `end`, inclusive.
    async fn get_price_history(
        &self,
        instrument: &InstrumentRef,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, QueryError>;

    /// Points of an interest rate curve.
    async fn get_curve_points(
        &self,
        currency: &str,
        family: &str,
        reference: &str,
    ) -> Result<Vec<CurvePoint>, QueryError>;
}
