//! Shared test utilities
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hearth_gateway::config::DispatchConfig;
use hearth_gateway::store::KeyValueStore;
use hearth_gateway::{ContactDirectory, JsonFileStore, LinkOpener, Result};

/// Build a contact directory backed by a temp store seeded with `contacts`
pub fn directory_with_contacts(
    contacts: serde_json::Value,
) -> (tempfile::TempDir, ContactDirectory) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = JsonFileStore::new(dir.path());
    store
        .set(hearth_gateway::contacts::CONTACTS_COLLECTION, &contacts)
        .expect("failed to seed contacts");
    (dir, ContactDirectory::new(Arc::new(store)))
}

/// Dispatch config with millisecond delays so tests settle quickly
pub fn fast_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        default_country_code: "55".to_string(),
        whatsapp_delay: Duration::from_millis(20),
        call_connect_delay: Duration::from_millis(20),
        call_upsell_delay: Duration::from_millis(20),
        telephony_endpoint: None,
    }
}

/// Link opener that records opened URLs instead of launching anything
#[derive(Default)]
pub struct CapturingOpener {
    urls: Mutex<Vec<String>>,
}

impl CapturingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.urls.lock().expect("opener lock poisoned").clone()
    }
}

#[async_trait]
impl LinkOpener for CapturingOpener {
    async fn open(&self, url: &str) -> Result<()> {
        self.urls
            .lock()
            .expect("opener lock poisoned")
            .push(url.to_string());
        Ok(())
    }
}
