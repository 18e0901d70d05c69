//! Core types for EIN Direct.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod tier;

pub use email::{Email, EmailError};
pub use id::{ApplicationId, ApplicationIdError};
pub use tier::{AmountError, PaymentAmount, ServiceTier, TierError};
