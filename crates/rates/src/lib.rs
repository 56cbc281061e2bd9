//! Exchange rate service and its HTTP client.
//!
//! The service answers `GET /rate?currency=CODE` with the number of base
//! currency units per one unit of `CODE`. [`HttpRateProvider`] implements
//! the core `RateProvider` trait on top of it.

pub mod client;
pub mod service;

pub use client::{ClientBuildError, HttpRateProvider};
pub use service::{router, RateBody, ServiceMessage};
