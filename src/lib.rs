//! # Fare Scanner
//!
//! Periodically searches a flight-offers API over a grid of routes and
//! departure/return dates, keeps a price history in SQLite, and notifies
//! round-trip fares that are far below the route's usual price.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Scanner   │──▶│ RateLimited  │──▶│ Amadeus or    │
//! │ (fan-out)  │   │   Client     │   │ Travelpayouts │
//! └─────┬──────┘   └──────────────┘   └───────────────┘
//!       │
//!       ▼
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ PriceStore │◀──│ DealDetector │──▶│  Notifier   │
//! │  (SQLite)  │   │   (median)   │   │ log/webhook │
//! └────────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fares init                     # create database
//! fares dates                    # preview the date grid
//! fares scan --once              # run a single cycle
//! fares scan                     # run until Ctrl-C
//! fares stats CDG NYC --month 6 --year 2025
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and credentials |
//! | [`models`] | Core data types |
//! | [`dates`] | Departure/return date-pair generation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Price ledger and notified-deal table |
//! | [`detector`] | Deal detection against the route median |
//! | [`provider`] | Provider abstraction, pacing, retry, Amadeus and Travelpayouts backends |
//! | [`notifier`] | Deal notification channels |
//! | [`scanner`] | Scan cycle orchestration and scheduling |
//! | [`stats`] | Route statistics |

pub mod config;
pub mod dates;
pub mod db;
pub mod detector;
pub mod migrate;
pub mod models;
pub mod notifier;
pub mod provider;
pub mod scanner;
pub mod stats;
pub mod store;
