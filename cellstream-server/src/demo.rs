//! Demo value provider.
//!
//! Stands in for the host platform: answers queries from a small generated
//! book and drives random-walk values for every live key.

use async_trait::async_trait;
use cellstream_core::error::QueryError;
use cellstream_core::key::{SubscriptionKey, SystemProperty};
use cellstream_core::types::{
    CellValue, CurvePoint, InstrumentRef, PositionFilter, PricePoint, ServiceStatus, ValueUpdate,
};
use chrono::{Datelike, Months, NaiveDate, Utc, Weekday};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::DemoProviderConfig;
use crate::provider::ValueProvider;
use crate::server::DataServer;

/// Curves the demo book knows, as (currency, family, reference, short rate).
const CURVES: &[(&str, &str, &str, f64)] = &[
    ("EUR", "EURIBOR", "3M", 0.035),
    ("EUR", "ESTR", "ON", 0.032),
    ("USD", "SOFR", "ON", 0.048),
    ("GBP", "SONIA", "ON", 0.047),
];

/// Tenors of every demo curve, with their length in months.
const TENORS: &[(&str, u32)] = &[
    ("1M", 1),
    ("3M", 3),
    ("6M", 6),
    ("1Y", 12),
    ("2Y", 24),
    ("5Y", 60),
    ("10Y", 120),
];

#[derive(Debug, Clone)]
struct DemoPosition {
    id: i32,
    instrument: i32,
    open: bool,
}

#[derive(Debug, Default)]
struct Book {
    portfolios: BTreeMap<i32, Vec<DemoPosition>>,
    unloaded: HashSet<i32>,
}

impl Book {
    fn generate(config: &DemoProviderConfig) -> Self {
        let mut portfolios = BTreeMap::new();
        for p in 1..=i32::from(config.portfolios) {
            let positions = (1..=i32::from(config.positions_per_portfolio))
                .map(|n| DemoPosition {
                    id: p * 1000 + n,
                    instrument: 100 + n,
                    // Every fourth position is closed.
                    open: n % 4 != 0,
                })
                .collect();
            portfolios.insert(p, positions);
        }

        let unloaded = config
            .unloaded_portfolios
            .iter()
            .copied()
            .filter(|id| portfolios.contains_key(id))
            .collect();

        Self {
            portfolios,
            unloaded,
        }
    }

    fn instrument_exists(&self, id: i32) -> bool {
        self.portfolios
            .values()
            .flatten()
            .any(|position| position.instrument == id)
    }
}

/// In-memory [`ValueProvider`].
///
/// Instruments are referenced by id or by the reference `INST<id>`.
pub struct DemoProvider {
    config: DemoProviderConfig,
    book: RwLock<Book>,
    live: Mutex<HashSet<SubscriptionKey>>,
    levels: Mutex<HashMap<SubscriptionKey, f64>>,
    calculations: AtomicU64,
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new(DemoProviderConfig::default())
    }
}

impl DemoProvider {
    /// Creates a provider with a book generated from `config`.
    #[must_use]
    pub fn new(config: DemoProviderConfig) -> Self {
        let book = Book::generate(&config);
        info!(
            portfolios = book.portfolios.len(),
            unloaded = book.unloaded.len(),
            "Demo book generated"
        );
        Self {
            config,
            book: RwLock::new(book),
            live: Mutex::new(HashSet::new()),
            levels: Mutex::new(HashMap::new()),
            calculations: AtomicU64::new(0),
        }
    }

    /// Returns the keys that currently have subscribers.
    #[must_use]
    pub fn live_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.live.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns how many recalculations were requested.
    #[must_use]
    pub fn calculations(&self) -> u64 {
        self.calculations.load(Ordering::Relaxed)
    }

    /// Produces the next value of every live key.
    pub fn tick(&self) -> Vec<ValueUpdate> {
        let keys = self.live_keys();
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        let mut levels = self.levels.lock();

        keys.into_iter()
            .map(|key| {
                let value = match &key {
                    SubscriptionKey::System(SystemProperty::PortfolioDate) => {
                        CellValue::Date(now.date_naive())
                    }
                    SubscriptionKey::Position { id, .. } | SubscriptionKey::Portfolio { id, .. } => {
                        let level = levels
                            .entry(key.clone())
                            .or_insert_with(|| 100.0 + f64::from(id.rem_euclid(50)));
                        let step: f64 = rng.gen_range(-1.0..=1.0) * self.config.volatility;
                        *level = (*level * (1.0 + step)).max(0.01);
                        CellValue::Number(round2(*level))
                    }
                };
                ValueUpdate::new(key, value).at(now)
            })
            .collect()
    }

    /// Publishes a tick every `tick_interval` until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        server: Arc<DataServer>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        info!(interval = ?self.config.tick_interval(), "Demo ticker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let updates = self.tick();
                    let delivered: usize = updates
                        .into_iter()
                        .map(|update| server.publish_update(update))
                        .sum();
                    if delivered > 0 {
                        debug!(delivered, "Tick published");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Demo ticker stopped");
    }
}

#[async_trait]
impl ValueProvider for DemoProvider {
    fn service_status(&self) -> ServiceStatus {
        if self.book.read().unloaded.is_empty() {
            ServiceStatus::Ready
        } else {
            ServiceStatus::Degraded
        }
    }

    fn on_key_live(&self, key: &SubscriptionKey) {
        self.live.lock().insert(key.clone());
    }

    fn on_key_idle(&self, key: &SubscriptionKey) {
        self.live.lock().remove(key);
        self.levels.lock().remove(key);
    }

    async fn load_positions(&self) {
        let mut book = self.book.write();
        if !book.unloaded.is_empty() {
            info!(portfolios = book.unloaded.len(), "Loading positions");
            book.unloaded.clear();
        }
    }

    async fn request_calculate(&self) {
        let n = self.calculations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(calculation = n, "Recalculation requested");
    }

    async fn get_positions(
        &self,
        portfolio_id: i32,
        filter: PositionFilter,
    ) -> Result<Vec<i32>, QueryError> {
        let book = self.book.read();
        let positions = book
            .portfolios
            .get(&portfolio_id)
            .ok_or(QueryError::PortfolioNotFound { portfolio_id })?;
        if book.unloaded.contains(&portfolio_id) {
            return Err(QueryError::PortfolioNotLoaded { portfolio_id });
        }

        Ok(positions
            .iter()
            .filter(|p| filter == PositionFilter::All || p.open)
            .map(|p| p.id)
            .collect())
    }

    async fn get_price_history(
        &self,
        instrument: &InstrumentRef,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, QueryError> {
        let id = match instrument {
            InstrumentRef::Id(id) => Some(*id),
            InstrumentRef::Reference(reference) => reference
                .strip_prefix("INST")
                .and_then(|rest| rest.parse().ok()),
        }
        .filter(|id| self.book.read().instrument_exists(*id))
        .ok_or_else(|| QueryError::InstrumentNotFound {
            instrument: instrument.clone(),
        })?;

        Ok(business_days(start, end)
            .map(|date| synthetic_price(id, date))
            .collect())
    }

    async fn get_curve_points(
        &self,
        currency: &str,
        family: &str,
        reference: &str,
    ) -> Result<Vec<CurvePoint>, QueryError> {
        let base = CURVES
            .iter()
            .find(|(c, f, r, _)| {
                c.eq_ignore_ascii_case(currency)
                    && f.eq_ignore_ascii_case(family)
                    && r.eq_ignore_ascii_case(reference)
            })
            .map(|(.., rate)| *rate)
            .ok_or_else(|| QueryError::CurveNotFound {
                currency: currency.to_string(),
                family: family.to_string(),
                reference: reference.to_string(),
            })?;

        let today = Utc::now().date_naive();
        Ok(TENORS
            .iter()
            .map(|(tenor, months)| CurvePoint {
                tenor: (*tenor).to_string(),
                maturity: today.checked_add_months(Months::new(*months)),
                rate: Some(round6(base + 0.0015 * f64::from(*months).ln_1p())),
            })
            .collect())
    }
}

fn business_days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
}

/// Deterministic price for an instrument on a date.
fn synthetic_price(instrument: i32, date: NaiveDate) -> PricePoint {
    let day = f64::from(date.num_days_from_ce());
    let base = 50.0 + f64::from(instrument.rem_euclid(100));
    let last = base + (day / 7.0 + f64::from(instrument)).sin() * base * 0.05;
    let first = last - (day / 3.0).cos() * 0.5;
    let mut point = PricePoint::new(date);
    point.first = Some(round2(first));
    point.high = Some(round2(first.max(last) + 0.75));
    point.low = Some(round2(first.min(last) - 0.75));
    point.last = Some(round2(last));
    point.theoretical = Some(round2((first + last) / 2.0));
    point.bid = Some(round2(last - 0.05));
    point.ask = Some(round2(last + 0.05));
    point.volume = Some((1000.0 + (day * 13.0 + f64::from(instrument)).sin().abs() * 9000.0).round());
    // Weekly gaps in the theoretical price show up as zero in the sheet.
    if date.weekday() == Weekday::Fri {
        point.theoretical = None;
    }
    point
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
