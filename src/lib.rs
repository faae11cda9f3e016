//! Health checklist ledger.
//!
//! Personnel answer two checklists a day; administrators review the daily
//! pass counts per team, export them as a workbook, and keep report cards.
//! Everything here runs without a window so the desktop binary stays a thin
//! command layer.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod model;
pub mod ordering;
pub mod report;
pub mod routes;
pub mod scoring;
pub mod session;
pub mod store;
pub mod survey;

pub use config::AppConfig;
pub use error::{AppError, AppResult, SurveyError};
pub use model::{InstrumentKind, UserRecord};
pub use session::{Session, SessionStore};
pub use store::DocumentStore;
