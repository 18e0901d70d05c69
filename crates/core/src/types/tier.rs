//! Service tier and payment amount types.
//!
//! The filing service is sold at exactly two price points, one per tier.
//! [`PaymentAmount`] can only be constructed through the checked parser or
//! the tier mapping, so an amount always corresponds to exactly one
//! [`ServiceTier`] and vice versa.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`ServiceTier`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    /// The input is not a recognized tier name.
    #[error("service tier must be \"standard\" or \"express\"")]
    Unknown,
}

/// Errors that can occur when parsing a [`PaymentAmount`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// The amount is not one of the two offered price points.
    #[error("amount must be {standard} or {express} dollars",
        standard = PaymentAmount::STANDARD_DOLLARS,
        express = PaymentAmount::EXPRESS_DOLLARS)]
    Unsupported,
}

/// Filing service tier offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    /// Standard filing, completed within 24-48 hours.
    #[default]
    Standard,
    /// Express filing, completed the same business day.
    Express,
}

impl ServiceTier {
    /// Parse a tier from its lowercase wire name.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Unknown`] for anything other than `"standard"`
    /// or `"express"`.
    pub fn parse(s: &str) -> Result<Self, TierError> {
        match s {
            "standard" => Ok(Self::Standard),
            "express" => Ok(Self::Express),
            _ => Err(TierError::Unknown),
        }
    }

    /// The tier's lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Express => "express",
        }
    }

    /// The price point charged for this tier.
    #[must_use]
    pub const fn amount(self) -> PaymentAmount {
        match self {
            Self::Standard => PaymentAmount {
                cents: PaymentAmount::STANDARD_CENTS,
            },
            Self::Express => PaymentAmount {
                cents: PaymentAmount::EXPRESS_CENTS,
            },
        }
    }

    /// Human-readable processing time quoted for this tier.
    #[must_use]
    pub const fn processing_estimate(self) -> &'static str {
        match self {
            Self::Standard => "24-48 hours",
            Self::Express => "Same business day",
        }
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceTier {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A checkout charge amount, restricted to the two offered price points.
///
/// ## Examples
///
/// ```
/// use ein_direct_core::{PaymentAmount, ServiceTier};
///
/// let amount = PaymentAmount::from_dollars(249).unwrap();
/// assert_eq!(amount.cents(), 24_900);
/// assert_eq!(amount.tier(), ServiceTier::Standard);
///
/// assert!(PaymentAmount::from_dollars(300).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentAmount {
    cents: u32,
}

impl PaymentAmount {
    /// Standard filing price in whole dollars.
    pub const STANDARD_DOLLARS: u32 = 249;
    /// Express filing price in whole dollars.
    pub const EXPRESS_DOLLARS: u32 = 329;

    const STANDARD_CENTS: u32 = Self::STANDARD_DOLLARS * 100;
    const EXPRESS_CENTS: u32 = Self::EXPRESS_DOLLARS * 100;

    /// Parse an amount from whole dollars.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Unsupported`] for any value other than the
    /// two offered price points.
    pub const fn from_dollars(dollars: i64) -> Result<Self, AmountError> {
        match dollars {
            d if d == Self::STANDARD_DOLLARS as i64 => Ok(Self {
                cents: Self::STANDARD_CENTS,
            }),
            d if d == Self::EXPRESS_DOLLARS as i64 => Ok(Self {
                cents: Self::EXPRESS_CENTS,
            }),
            _ => Err(AmountError::Unsupported),
        }
    }

    /// The amount in cents, as charged by the payment provider.
    #[must_use]
    pub const fn cents(self) -> u32 {
        self.cents
    }

    /// The amount in whole dollars.
    #[must_use]
    pub const fn dollars(self) -> u32 {
        self.cents / 100
    }

    /// The service tier this price point pays for.
    #[must_use]
    pub const fn tier(self) -> ServiceTier {
        match self.cents {
            Self::EXPRESS_CENTS => ServiceTier::Express,
            _ => ServiceTier::Standard,
        }
    }
}

impl fmt::Display for PaymentAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.dollars())
    }
}
