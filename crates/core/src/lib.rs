//! Domain logic for the spreadsheet import and entity-reconciliation engine.
//!
//! Nothing in this crate talks to HTTP or SQL. Persistence is reached through
//! the [`catalog::CatalogProvider`] and [`store::EntityStore`] traits, which
//! `salesdesk-db` implements for PostgreSQL and this crate implements in
//! memory.

pub mod catalog;
pub mod coerce;
pub mod commit;
pub mod error;
pub mod mapping;
pub mod parser;
pub mod resolution;
pub mod schema;
pub mod session;
pub mod store;
pub mod types;
pub mod validator;
