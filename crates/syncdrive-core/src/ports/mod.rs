//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - Cloud capability traits ([`DeltaFetcher`], [`ItemClient`], [`Downloader`],
//!   [`RangeDownloader`], [`Uploader`], [`SessionUploader`], [`AuthProvider`])
//! - [`BaselineStore`] - Persistent baseline state, delta tokens, conflict history
//! - [`AuditStore`] - Persistent audit trail for `syncdrive explain`
//! - [`LocalFileSystem`] - Local filesystem operations and file watching
//! - [`NotificationService`] - Desktop notifications and progress reporting

pub mod audit_store;
pub mod cloud_provider;
pub mod local_filesystem;
pub mod notification;
pub mod state_repository;

pub use audit_store::AuditStore;
pub use cloud_provider::{
    AuthProvider, DeltaFetcher, DeltaPage, Downloader, ItemClient, ProviderError, RangeDownloader,
    RemoteItem, SessionUploader, Tokens, UploadSession, Uploader, UserInfo,
};
pub use local_filesystem::{FileObserver, FileSystemState, LocalFileSystem, WatchHandle};
pub use notification::{Notification, NotificationPriority, NotificationService};
pub use state_repository::BaselineStore;
