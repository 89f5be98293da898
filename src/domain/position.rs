//! Single-symbol position bookkeeping.

/// Share counts below this are treated as flat.
pub const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub shares: f64,
    /// Last marked price, in the current share basis.
    pub price: Option<f64>,
    pub exposure: f64,
}

impl Position {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            shares: 0.0,
            price: None,
            exposure: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shares.abs() > SHARE_EPSILON
    }

    pub fn is_long(&self) -> bool {
        self.shares > SHARE_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.shares < -SHARE_EPSILON
    }

    pub fn market_value(&self) -> f64 {
        self.shares * self.price.unwrap_or(0.0)
    }

    /// Apply the day's split and dividend, then mark to `close`. Returns the
    /// day's P&L on the shares held coming into the day.
    pub fn mark(&mut self, close: f64, dividend: f64, split: f64) -> f64 {
        let split = if split > 0.0 { split } else { 1.0 };
        self.shares *= split;
        let previous = self.price.map(|p| p / split);

        let mut pl = self.shares * dividend;
        if let Some(prev) = previous {
            pl += self.shares * (close - prev);
        }
        self.price = Some(close);
        self.exposure = self.market_value();
        pl
    }

    /// Move to `shares`, priced at `price`.
    pub fn set_shares(&mut self, shares: f64, price: f64) {
        self.shares = if shares.abs() > SHARE_EPSILON { shares } else { 0.0 };
        self.price = Some(price);
        self.exposure = self.market_value();
    }
}
