//! Contact directory
//!
//! Read-only view over the host application's `familyContacts` collection.
//! The voice core resolves spoken names with a case-insensitive substring
//! match and never mutates the collection. When the collection is absent,
//! a small seed set keeps the assistant usable out of the box.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::KeyValueStore;

/// Store collection holding the family contacts
pub const CONTACTS_COLLECTION: &str = "familyContacts";

/// One family contact record, owned by the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Record identifier
    pub id: u64,
    /// Display name, matched against spoken names
    pub name: String,
    /// Relationship label (e.g. "Esposa")
    #[serde(default)]
    pub relationship: String,
    /// Phone number for calls
    #[serde(default)]
    pub phone: String,
    /// Number registered with the messaging service
    #[serde(default)]
    pub whatsapp: String,
    /// Email address
    #[serde(default)]
    pub email: String,
}

/// Read-only contact lookup over the injected store
#[derive(Clone)]
pub struct ContactDirectory {
    store: Arc<dyn KeyValueStore>,
}

impl ContactDirectory {
    /// Create a directory over the given store
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All contacts: the stored collection, or the seed set when absent
    #[must_use]
    pub fn contacts(&self) -> Vec<Contact> {
        match self.store.get(CONTACTS_COLLECTION) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(contacts) => contacts,
                Err(e) => {
                    tracing::warn!(error = %e, "contacts collection is malformed, using defaults");
                    default_contacts()
                }
            },
            Ok(None) => default_contacts(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read contacts, using defaults");
                default_contacts()
            }
        }
    }

    /// Resolve a spoken name to a contact
    ///
    /// Case-insensitive substring match on the contact name; the first match
    /// wins. `None` means the caller should fall back to the contacts screen.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Contact> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.contacts()
            .into_iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
    }
}

/// Seed contacts used when the host application has stored none
fn default_contacts() -> Vec<Contact> {
    vec![
        Contact {
            id: 1,
            name: "Cris".to_string(),
            relationship: "Esposa".to_string(),
            phone: "+5511999999999".to_string(),
            whatsapp: "+5511999999999".to_string(),
            email: "cris@email.com".to_string(),
        },
        Contact {
            id: 2,
            name: "Filho".to_string(),
            relationship: "Filho".to_string(),
            phone: "+5511988888888".to_string(),
            whatsapp: "+5511988888888".to_string(),
            email: String::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    fn directory_with(contacts: serde_json::Value) -> (tempfile::TempDir, ContactDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.set(CONTACTS_COLLECTION, &contacts).unwrap();
        (dir, ContactDirectory::new(Arc::new(store)))
    }

    #[test]
    fn resolves_case_insensitive_substring() {
        let (_dir, directory) = directory_with(serde_json::json!([
            {"id": 1, "name": "Cristina", "whatsapp": "+5511912345678"}
        ]));

        let contact = directory.resolve("cris").unwrap();
        assert_eq!(contact.name, "Cristina");
        let contact = directory.resolve("CRIS").unwrap();
        assert_eq!(contact.name, "Cristina");
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let (_dir, directory) = directory_with(serde_json::json!([
            {"id": 1, "name": "Cristina"}
        ]));
        assert!(directory.resolve("unknown_name").is_none());
    }

    #[test]
    fn empty_name_never_matches() {
        let (_dir, directory) = directory_with(serde_json::json!([
            {"id": 1, "name": "Cristina"}
        ]));
        assert!(directory.resolve("  ").is_none());
    }

    #[test]
    fn missing_collection_falls_back_to_seed_contacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let directory = ContactDirectory::new(Arc::new(store));
        assert!(directory.resolve("cris").is_some());
    }
}
