//! Token fares and base-unit conversion.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AgoraError, Result};
use crate::types::Address;

/// A payment token and its decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fare {
    /// Token contract address.
    pub token: Address,

    /// Decimal precision. `None` until resolved from the token contract.
    pub decimals: Option<u8>,
}

impl Fare {
    pub fn new(token: impl Into<Address>, decimals: u8) -> Self {
        Self {
            token: token.into(),
            decimals: Some(decimals),
        }
    }

    /// A fare whose precision has not been read yet.
    pub fn unresolved(token: impl Into<Address>) -> Self {
        Self {
            token: token.into(),
            decimals: None,
        }
    }

    fn precision(&self) -> Result<u32> {
        self.decimals
            .map(u32::from)
            .ok_or_else(|| AgoraError::InvalidFare(format!("precision of {} is unknown", self.token)))
    }

    /// Convert a human amount to base units (`amount * 10^decimals`).
    ///
    /// Fractions below one base unit round to the nearest integer, half away
    /// from zero. Negative amounts are rejected.
    pub fn to_base_units(&self, amount: Decimal) -> Result<u128> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(AgoraError::InvalidFare(format!("negative amount {amount}")));
        }
        let decimals = self.precision()?;

        // Scaled in u128: large amounts at 18 decimals exceed Decimal's mantissa.
        let mantissa = amount.mantissa().unsigned_abs();
        let scale = amount.scale();
        let overflow = || AgoraError::InvalidFare(format!("{amount} overflows {}", self.token));

        if decimals >= scale {
            let factor = 10u128.checked_pow(decimals - scale).ok_or_else(overflow)?;
            mantissa.checked_mul(factor).ok_or_else(overflow)
        } else {
            let divisor = 10u128.pow(scale - decimals);
            let quotient = mantissa / divisor;
            let remainder = mantissa % divisor;
            if remainder * 2 >= divisor {
                quotient.checked_add(1).ok_or_else(overflow)
            } else {
                Ok(quotient)
            }
        }
    }
}

impl fmt::Display for Fare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decimals {
            Some(decimals) => write!(f, "{} ({} decimals)", self.token, decimals),
            None => write!(f, "{} (unresolved)", self.token),
        }
    }
}

/// An amount in base units of a specific fare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareAmount {
    #[serde(with = "crate::memo::base_units")]
    pub amount: u128,
    pub fare: Fare,
}

impl FareAmount {
    pub fn new(amount: u128, fare: Fare) -> Self {
        Self { amount, fare }
    }

    /// Convert a human amount using the fare's precision.
    pub fn from_human(amount: Decimal, fare: Fare) -> Result<Self> {
        let amount = fare.to_base_units(amount)?;
        Ok(Self { amount, fare })
    }

    /// Sum two amounts of the same token.
    pub fn add(&self, other: &FareAmount) -> Result<FareAmount> {
        if self.fare.token != other.fare.token {
            return Err(AgoraError::InvalidFare(format!(
                "cannot add {} to {}",
                other.fare.token, self.fare.token
            )));
        }
        let amount = self.amount.checked_add(other.amount).ok_or_else(|| {
            AgoraError::InvalidFare(format!("sum overflows {}", self.fare.token))
        })?;
        Ok(FareAmount {
            amount,
            fare: self.fare.clone(),
        })
    }
}
