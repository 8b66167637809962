//! Prepaid gift-card balance ledger and its point-of-sale charge
//! protocol: identity resolution from scanned QR payloads, an atomically
//! debited balance store, an append-only charge journal, the charge
//! coordinator state machine, and the merchant accrual read model.

// The store and journal seams are generic, never trait objects, so plain
// `async fn` in the traits is enough.
#![allow(async_fn_in_trait)]

pub mod accrual;
pub mod balance;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod identity;
pub mod journal;
pub mod script;
pub mod service;
pub mod sweep;

pub use config::Config;
