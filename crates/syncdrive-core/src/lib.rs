//! syncdrive Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `BaselineEntry`, `Item`, `ChangeEvent`, `Action`, `ConflictRecord`,
//!   `Account`, `AuditEntry`, `SyncSession`
//! - **Port definitions** - Capability traits for adapters: `DeltaFetcher`, `ItemClient`,
//!   `Downloader`, `Uploader`, `BaselineStore`, `LocalFileSystem`
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement. Orchestration
//! of the observer/planner/executor pipeline lives in `syncdrive-sync`, not here.

pub mod config;
pub mod domain;
pub mod ports;
