//! Geofenced tourism check-ins and loyalty-token marketplace on Stellar
//!
//! Location-gated check-ins mint commemorative tokens; purchases spend XLM,
//! optionally discounted by burning TUR. Every ledger write goes through one
//! simulate → sign → submit → confirm pipeline.

pub mod balance;
pub mod catalog;
pub mod checkin;
pub mod config;
pub mod error;
pub mod execution;
pub mod geo;
pub mod ledger;
pub mod location;
pub mod marketplace;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod wallet;
