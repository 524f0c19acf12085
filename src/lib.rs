//! tenant-storage - A tenant-scoped object storage gateway
//!
//! This crate stores uploaded files under `{tenant}/{company}/{category}/{file_id}` keys with:
//! - Swappable blob store backends (local filesystem, GCS)
//! - Create-only uploads that never silently overwrite an existing object
//! - redb embedded database for users and their file associations
//! - REST API with multipart upload and streamed download

pub mod api;
pub mod blob_store;
pub mod config;
pub mod gateway;
pub mod key;
pub mod notify;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use gateway::ObjectGateway;
use notify::FileNotifier;
use storage::{AssociationRecorder, Database};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub gateway: ObjectGateway,
    pub associations: Arc<dyn AssociationRecorder>,
    pub notifier: Arc<dyn FileNotifier>,
}
