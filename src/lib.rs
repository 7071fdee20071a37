//! Reverse-engineered web-API extraction core for Terabox-family file-host
//! share links. Given a share URL, resolves the Host's internal share
//! metadata and walks a ladder of API endpoints to produce a direct,
//! playable media URL.
//!
//! The public surface is [`Core`]: build one with [`Core::from_env`] or
//! [`Core::new`], then call [`Core::extract`].

pub mod api_client;
pub mod core;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use core::{Core, ExtractorConfig};
pub use core::types::{FileEntry, HostError, MediaInfo, QualityOption, ShareContext, ShareLocator, SessionState};
pub use error::ExtractError;
