// Strong Types - storage representations for money and time
// Domain code works with Decimal and DateTime<Utc>; the store keeps integer cents and epoch millis.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// Epoch-millisecond timestamp as persisted in `created_at`/`updated_at` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0).single().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

/// Convert a price to integer minor units, rounding to two decimal places.
pub fn price_to_cents(price: Decimal) -> AppResult<i64> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(AppError::Validation("Price cannot be negative.".to_string()));
    }
    (price.round_dp(2) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("Price {} is out of range.", price)))
}

pub fn cents_to_price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
