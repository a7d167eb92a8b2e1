//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence so route handlers can
//! stay focused on request parsing, authorization and status mapping.
//! `pricing` is pure; every other module talks to Postgres. Functions that
//! must join a caller's transaction take `&mut PgConnection`.

pub mod audit;
pub mod auth;
pub mod billing;
pub mod bookings;
pub mod class_types;
pub mod classes;
pub mod pricing;
pub mod schedules;
pub mod subscriptions;
pub mod users;
pub mod wallet;
