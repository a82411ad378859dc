//! tmb-ingest: the TinyMotion intake layer
//!
//! - `pipeline`: upload-verify-encrypt-persist transaction with rollback
//! - `guard`: consent rules shared by every write path
//! - `library`: stored-name generation and path resolution for video files
//! - `users`, `infants`, `consents`, `videos`: record services over an
//!   [`tmb_store::EntityStore`]
//!
//! Services are free functions taking the store by reference; the caller
//! identity (`created_by`) is passed explicitly.

pub mod consents;
pub mod error;
pub mod guard;
pub mod infants;
pub mod library;
pub mod pipeline;
pub mod users;
pub mod videos;

pub use error::{IngestError, IngestResult};
pub use guard::ConsentGuard;
pub use library::VideoLibrary;
pub use pipeline::{ExportOutcome, UploadRequest, VideoIngest};
