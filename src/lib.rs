//! Per-account media storage with mirroring to remote destinations.
//!
//! [`store::TenantStore`] owns one SQLite database and file tree per account,
//! [`media::MediaStore`] ingests content-addressed media on top of it, and
//! [`sync::SyncEngine`] keeps configured destinations in step with what is
//! stored locally.

pub mod accounts;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod store;
pub mod sync;

pub use accounts::{Account, AccountKey};
pub use error::{Error, Result};
pub use media::{MediaFilter, MediaRecord, MediaStore};
pub use store::{TenantId, TenantStore};
pub use sync::{catalog::SyncCatalog, SyncEngine};
