//! Spending ledger
//!
//! Hourly and daily running totals, each with its own reset timestamp.
//! Executed transfers are counted in the windows; transfers between
//! `executing` and a final outcome are held as an in-flight reservation
//! that counts against both limits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which spending window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingWindow {
    Hourly,
    Daily,
}

impl SpendingWindow {
    pub fn duration(&self) -> Duration {
        match self {
            SpendingWindow::Hourly => Duration::hours(1),
            SpendingWindow::Daily => Duration::days(1),
        }
    }
}

impl std::fmt::Display for SpendingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpendingWindow::Hourly => write!(f, "hourly"),
            SpendingWindow::Daily => write!(f, "daily"),
        }
    }
}

/// One window's running total
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowTotal {
    pub spent: f64,
    pub transfer_count: u32,
    pub resets_at: DateTime<Utc>,
}

impl WindowTotal {
    fn new(now: DateTime<Utc>, window: SpendingWindow) -> Self {
        Self {
            spent: 0.0,
            transfer_count: 0,
            resets_at: now + window.duration(),
        }
    }
}

/// Hourly + daily spend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendingLedger {
    pub hourly: WindowTotal,
    pub daily: WindowTotal,
    /// Reserved by proposals currently executing
    #[serde(default)]
    pub in_flight: f64,
}

impl SpendingLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            hourly: WindowTotal::new(now, SpendingWindow::Hourly),
            daily: WindowTotal::new(now, SpendingWindow::Daily),
            in_flight: 0.0,
        }
    }

    /// Reset any window whose period has elapsed
    pub fn reset_if_elapsed(&mut self, now: DateTime<Utc>) {
        if now >= self.hourly.resets_at {
            self.hourly = WindowTotal::new(now, SpendingWindow::Hourly);
        }
        if now >= self.daily.resets_at {
            self.daily = WindowTotal::new(now, SpendingWindow::Daily);
        }
    }

    /// Add an executed amount to both windows
    pub fn record(&mut self, now: DateTime<Utc>, amount: f64) {
        self.reset_if_elapsed(now);
        self.hourly.spent += amount;
        self.hourly.transfer_count += 1;
        self.daily.spent += amount;
        self.daily.transfer_count += 1;
    }

    /// Spent plus in-flight, the figure limits are checked against
    pub fn committed(&self, window: SpendingWindow) -> f64 {
        self.window(window).spent + self.in_flight
    }

    /// Hold `amount` against both limits until it settles or is released
    pub fn reserve(&mut self, amount: f64) {
        self.in_flight += amount;
    }

    /// Drop a reservation without recording spend
    pub fn release(&mut self, amount: f64) {
        self.in_flight = (self.in_flight - amount).max(0.0);
    }

    /// Turn a reservation into executed spend
    pub fn settle(&mut self, now: DateTime<Utc>, amount: f64) {
        self.release(amount);
        self.record(now, amount);
    }

    pub fn window(&self, window: SpendingWindow) -> &WindowTotal {
        match window {
            SpendingWindow::Hourly => &self.hourly,
            SpendingWindow::Daily => &self.daily,
        }
    }

    /// Overwrite a window's total (restore from durable store)
    pub fn set_spent(&mut self, window: SpendingWindow, spent: f64) {
        match window {
            SpendingWindow::Hourly => self.hourly.spent = spent,
            SpendingWindow::Daily => self.daily.spent = spent,
        }
    }
}

/// Spend versus limits, for introspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingStatus {
    pub hourly_spent: f64,
    pub hourly_limit: f64,
    pub hourly_remaining: f64,
    pub hourly_resets_at: DateTime<Utc>,
    pub daily_spent: f64,
    pub daily_limit: f64,
    pub daily_remaining: f64,
    pub daily_resets_at: DateTime<Utc>,
    pub max_single_transfer: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_both_windows() {
        let now = Utc::now();
        let mut ledger = SpendingLedger::new(now);
        ledger.record(now, 1000.0);
        ledger.record(now, 500.0);

        assert_eq!(ledger.hourly.spent, 1500.0);
        assert_eq!(ledger.daily.spent, 1500.0);
        assert_eq!(ledger.daily.transfer_count, 2);
    }

    #[test]
    fn test_hourly_resets_independently() {
        let now = Utc::now();
        let mut ledger = SpendingLedger::new(now);
        ledger.record(now, 1000.0);

        let later = now + Duration::minutes(61);
        ledger.reset_if_elapsed(later);
        assert_eq!(ledger.hourly.spent, 0.0);
        assert_eq!(ledger.daily.spent, 1000.0);
        assert_eq!(ledger.hourly.resets_at, later + Duration::hours(1));

        ledger.reset_if_elapsed(now + Duration::hours(25));
        assert_eq!(ledger.daily.spent, 0.0);
    }

    #[test]
    fn test_reservation_counts_until_settled() {
        let now = Utc::now();
        let mut ledger = SpendingLedger::new(now);
        ledger.record(now, 1000.0);
        ledger.reserve(4000.0);
        assert_eq!(ledger.committed(SpendingWindow::Hourly), 5000.0);
        assert_eq!(ledger.hourly.spent, 1000.0);

        ledger.settle(now, 4000.0);
        assert_eq!(ledger.in_flight, 0.0);
        assert_eq!(ledger.committed(SpendingWindow::Daily), 5000.0);

        ledger.reserve(2000.0);
        ledger.release(2000.0);
        assert_eq!(ledger.committed(SpendingWindow::Hourly), 5000.0);
        assert_eq!(ledger.hourly.transfer_count, 2);
    }
}
