//! EIN Direct Core - Shared types library.
//!
//! This crate provides common types used across EIN Direct components:
//! - `web` - Public-facing marketing site and API backend
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients. This keeps
//! it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for emails, service tiers, payment
//!   amounts, and application identifiers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
