//! Procurement Core Library
//!
//! This crate provides the purchase-order fulfillment core: the
//! status-transition validator, the receive-staging pipeline, landed-cost
//! allocation, and fulfillment reconciliation. Persistence, inventory
//! commitment, the location picker, and the quality gate are opaque
//! collaborators behind the traits in [`gateways`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod logging;
pub mod models;
pub mod services;

pub use config::{load_config, AppConfig};
pub use errors::{CommitReport, CommitSubStep, ServiceError};
pub use events::{Event, EventSender};
pub use models::{OrderStatus, PaymentStatus, PurchaseOrder};
pub use services::{
    CommitSuccess, CostAllocationEngine, FulfillmentSummary, ReceiveMode,
    ReceiveStagingOrchestrator, StagingView,
};
