//! Client/server wire protocol.
//!
//! Every client call travels as a [`ClientFrame::Request`] carrying a request
//! id; the server answers with a [`ServerFrame::Response`] echoing that id.
//! Value pushes travel as unsolicited [`ServerFrame::Callback`] frames.
//!
//! Frames are JSON objects tagged with a `type` field:
//!
//! ```json
//! {"type":"request","id":3,"call":{"op":"subscribe_to_position","id":5,"column":"Price"}}
//! {"type":"response","id":3,"outcome":{"Ok":{"reply":"unit"}}}
//! {"type":"callback","callback":{"kind":"position_value","id":5,"column":"Price","value":{"type":"number","value":101.5}}}
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::QueryError;
use crate::key::{SubscriptionKey, SystemProperty};
use crate::types::{
    CellValue, CurvePoint, InstrumentRef, PositionFilter, PricePoint, ServiceStatus, ValueUpdate,
};

/// A remote operation invoked by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    /// Register the caller as a session
    Register,
    /// Remove the caller's session
    Unregister,
    /// Subscribe to a position column
    SubscribeToPosition {
        /// Position identifier
        id: i32,
        /// Column name
        column: String,
    },
    /// Unsubscribe from a position column
    UnsubscribeToPosition {
        /// Position identifier
        id: i32,
        /// Column name
        column: String,
    },
    /// Subscribe to a portfolio column
    SubscribeToPortfolio {
        /// Portfolio identifier
        id: i32,
        /// Column name
        column: String,
    },
    /// Unsubscribe from a portfolio column
    UnsubscribeToPortfolio {
        /// Portfolio identifier
        id: i32,
        /// Column name
        column: String,
    },
    /// Subscribe to a system property
    SubscribeToSystemValue {
        /// Property
        property: SystemProperty,
    },
    /// Unsubscribe from a system property
    UnsubscribeToSystemValue {
        /// Property
        property: SystemProperty,
    },
    /// Ask the source to load positions
    LoadPositions,
    /// Ask the source to recompute values
    RequestCalculate,
    /// Query the service status
    GetServiceStatus,
    /// List position ids of a portfolio
    GetPositions {
        /// Portfolio identifier
        portfolio_id: i32,
        /// Which positions to return
        filter: PositionFilter,
    },
    /// Price history of an instrument between two dates, inclusive
    GetPriceHistory {
        /// Instrument code or reference
        instrument: InstrumentRef,
        /// First date
        start: NaiveDate,
        /// Last date
        end: NaiveDate,
    },
    /// Points of an interest rate curve
    GetCurvePoints {
        /// Curve currency
        currency: String,
        /// Curve family
        family: String,
        /// Curve reference
        reference: String,
    },
}

impl Call {
    /// Builds the subscribe call for `key`.
    #[must_use]
    pub fn subscribe(key: &SubscriptionKey) -> Self {
        match key {
            SubscriptionKey::Position { id, column } => Self::SubscribeToPosition {
                id: *id,
                column: column.clone(),
            },
            SubscriptionKey::Portfolio { id, column } => Self::SubscribeToPortfolio {
                id: *id,
                column: column.clone(),
            },
            SubscriptionKey::System(property) => Self::SubscribeToSystemValue {
                property: *property,
            },
        }
    }

    /// Builds the unsubscribe call for `key`.
    #[must_use]
    pub fn unsubscribe(key: &SubscriptionKey) -> Self {
        match key {
            SubscriptionKey::Position { id, column } => Self::UnsubscribeToPosition {
                id: *id,
                column: column.clone(),
            },
            SubscriptionKey::Portfolio { id, column } => Self::UnsubscribeToPortfolio {
                id: *id,
                column: column.clone(),
            },
            SubscriptionKey::System(property) => Self::UnsubscribeToSystemValue {
                property: *property,
            },
        }
    }

    /// For subscription calls, returns the key and whether it subscribes
    /// (`true`) or unsubscribes (`false`).
    #[must_use]
    pub fn subscription(&self) -> Option<(SubscriptionKey, bool)> {
        match self {
            Self::SubscribeToPosition { id, column } => {
                Some((SubscriptionKey::position(*id, column.clone()), true))
            }
            Self::UnsubscribeToPosition { id, column } => {
                Some((SubscriptionKey::position(*id, column.clone()), false))
            }
            Self::SubscribeToPortfolio { id, column } => {
                Some((SubscriptionKey::portfolio(*id, column.clone()), true))
            }
            Self::UnsubscribeToPortfolio { id, column } => {
                Some((SubscriptionKey::portfolio(*id, column.clone()), false))
            }
            Self::SubscribeToSystemValue { property } => {
                Some((SubscriptionKey::system(*property), true))
            }
            Self::UnsubscribeToSystemValue { property } => {
                Some((SubscriptionKey::system(*property), false))
            }
            _ => None,
        }
    }

    /// Operation name used in logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::SubscribeToPosition { .. } => "subscribe_to_position",
            Self::UnsubscribeToPosition { .. } => "unsubscribe_to_position",
            Self::SubscribeToPortfolio { .. } => "subscribe_to_portfolio",
            Self::UnsubscribeToPortfolio { .. } => "unsubscribe_to_portfolio",
            Self::SubscribeToSystemValue { .. } => "subscribe_to_system_value",
            Self::UnsubscribeToSystemValue { .. } => "unsubscribe_to_system_value",
            Self::LoadPositions => "load_positions",
            Self::RequestCalculate => "request_calculate",
            Self::GetServiceStatus => "get_service_status",
            Self::GetPositions { .. } => "get_positions",
            Self::GetPriceHistory { .. } => "get_price_history",
            Self::GetCurvePoints { .. } => "get_curve_points",
        }
    }
}

/// Successful result of a [`Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "snake_case")]
pub enum Reply {
    /// Call completed without a result value
    Unit,
    /// Service status
    Status(ServiceStatus),
    /// Position ids
    Positions(Vec<i32>),
    /// Price history, in date order
    PriceHistory(Vec<PricePoint>),
    /// Curve points
    CurvePoints(Vec<CurvePoint>),
}

impl Reply {
    /// Short name of the reply kind, used in mismatch errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Status(_) => "status",
            Self::Positions(_) => "positions",
            Self::PriceHistory(_) => "price_history",
            Self::CurvePoints(_) => "curve_points",
        }
    }
}

/// Failed result of a [`Call`] as reported by the server.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", content = "detail", rename_all = "snake_case")]
pub enum RemoteFault {
    /// Expected domain fault
    #[error("{0}")]
    Query(QueryError),
    /// The call requires a registered session
    #[error("Session is not registered")]
    NotRegistered,
    /// Unexpected server side failure
    #[error("Server error: {0}")]
    Internal(String),
}

/// Value or status pushed from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Callback {
    /// New value for a position column
    PositionValue {
        /// Position identifier
        id: i32,
        /// Column name
        column: String,
        /// The value
        value: CellValue,
    },
    /// New value for a portfolio column
    PortfolioValue {
        /// Portfolio identifier
        id: i32,
        /// Column name
        column: String,
        /// The value
        value: CellValue,
    },
    /// New value for a system property
    SystemValue {
        /// Property
        property: SystemProperty,
        /// The value
        value: CellValue,
    },
    /// Service status changed
    ServiceStatus {
        /// New status
        status: ServiceStatus,
    },
}

impl Callback {
    /// Converts a value update into the callback for its key category.
    #[must_use]
    pub fn from_update(update: ValueUpdate) -> Self {
        let ValueUpdate { key, value, .. } = update;
        match key {
            SubscriptionKey::Position { id, column } => Self::PositionValue { id, column, value },
            SubscriptionKey::Portfolio { id, column } => Self::PortfolioValue { id, column, value },
            SubscriptionKey::System(property) => Self::SystemValue { property, value },
        }
    }

    /// Returns the key a value callback belongs to; `None` for status callbacks.
    #[must_use]
    pub fn key(&self) -> Option<SubscriptionKey> {
        match self {
            Self::PositionValue { id, column, .. } => {
                Some(SubscriptionKey::position(*id, column.clone()))
            }
            Self::PortfolioValue { id, column, .. } => {
                Some(SubscriptionKey::portfolio(*id, column.clone()))
            }
            Self::SystemValue { property, .. } => Some(SubscriptionKey::system(*property)),
            Self::ServiceStatus { .. } => None,
        }
    }
}

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A call awaiting a response with the same id
    Request {
        /// Request id, unique per connection
        id: u64,
        /// The call
        call: Call,
    },
}

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Response to the request with the same id
    Response {
        /// Request id being answered
        id: u64,
        /// Outcome of the call
        outcome: Result<Reply, RemoteFault>,
    },
    /// Unsolicited push
    Callback {
        /// The pushed callback
        callback: Callback,
    },
}

impl ServerFrame {
    /// Wraps a callback in a frame.
    #[must_use]
    pub const fn callback(callback: Callback) -> Self {
        Self::Callback { callback }
    }
}
