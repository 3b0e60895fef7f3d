//! Move-out and rent-increase retention analysis for a self-storage portfolio.
//!
//! The analysis core is [`survival::estimate_survival`] and
//! [`moveouts::aggregate_move_outs`]; the remaining modules load their inputs
//! from Postgres and the blob store and export the results.

pub mod blob;
pub mod cache;
pub mod config;
pub mod db;
pub mod ecri;
pub mod error;
pub mod export;
pub mod models;
pub mod moveouts;
pub mod report;
pub mod source;
pub mod survival;

pub use error::{DashboardError, Result};
pub use moveouts::{aggregate_move_outs, DateWindow, MoveOutAnalysis};
pub use survival::estimate_survival;
