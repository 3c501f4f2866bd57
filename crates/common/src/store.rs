//! Record store abstraction.
//!
//! Persistence is modelled as named collections of JSON documents keyed by
//! string. [`RecordStore`] is the capability every backend implements;
//! [`HubRecords`] is the typed view the engine works with.

use crate::types::{GlobalSettings, Hub, HubInterface, HubKeyPair, Peer};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Hub singletons: interface, keypair, global settings
    Hub,
    /// One record per peer, keyed by peer ID
    Peers,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Peers => "peers",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of the hub singletons
pub const HUB_INTERFACE_KEY: &str = "interface";
pub const HUB_KEYPAIR_KEY: &str = "keypair";
pub const GLOBAL_SETTINGS_KEY: &str = "global_settings";

/// Trait for record storage backends.
///
/// Each `write` replaces the whole record and is atomic for that record.
pub trait RecordStore: Send + Sync {
    /// Reads one record.
    fn read(&self, collection: Collection, key: &str) -> Result<Option<String>>;

    /// Reads every record of a collection, ordered by key.
    fn read_all(&self, collection: Collection) -> Result<Vec<String>>;

    /// Creates or replaces one record.
    fn write(&self, collection: Collection, key: &str, value: &str) -> Result<()>;

    /// Deletes one record. Returns false if it did not exist.
    fn delete(&self, collection: Collection, key: &str) -> Result<bool>;
}

/// In-memory record store, used by tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(Collection, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection
    pub fn count(&self, collection: Collection) -> usize {
        self.records
            .read()
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .read()
            .get(&(collection, key.to_string()))
            .cloned())
    }

    fn read_all(&self, collection: Collection) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn write(&self, collection: Collection, key: &str, value: &str) -> Result<()> {
        self.records
            .write()
            .insert((collection, key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        Ok(self
            .records
            .write()
            .remove(&(collection, key.to_string()))
            .is_some())
    }
}

/// Typed access to the hub and peer records
#[derive(Clone)]
pub struct HubRecords {
    store: Arc<dyn RecordStore>,
}

impl HubRecords {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>> {
        debug!("Reading {}.{}", collection, key);
        match self.store.read(collection, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn require<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<T> {
        self.get(collection, key)?
            .ok_or_else(|| Error::not_found(collection.as_str(), key))
    }

    fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.write(collection, key, &raw)
    }

    // ========================================================================
    // Hub singletons
    // ========================================================================

    pub fn get_hub_interface(&self) -> Result<HubInterface> {
        self.require(Collection::Hub, HUB_INTERFACE_KEY)
    }

    pub fn get_hub_keypair(&self) -> Result<HubKeyPair> {
        self.require(Collection::Hub, HUB_KEYPAIR_KEY)
    }

    pub fn get_global_settings(&self) -> Result<GlobalSettings> {
        self.require(Collection::Hub, GLOBAL_SETTINGS_KEY)
    }

    /// Interface and key pair together
    pub fn get_hub(&self) -> Result<Hub> {
        Ok(Hub {
            interface: self.get_hub_interface()?,
            keypair: self.get_hub_keypair()?,
        })
    }

    pub fn find_hub_interface(&self) -> Result<Option<HubInterface>> {
        self.get(Collection::Hub, HUB_INTERFACE_KEY)
    }

    pub fn find_hub_keypair(&self) -> Result<Option<HubKeyPair>> {
        self.get(Collection::Hub, HUB_KEYPAIR_KEY)
    }

    pub fn find_global_settings(&self) -> Result<Option<GlobalSettings>> {
        self.get(Collection::Hub, GLOBAL_SETTINGS_KEY)
    }

    pub fn save_hub_interface(&self, interface: &HubInterface) -> Result<()> {
        self.put(Collection::Hub, HUB_INTERFACE_KEY, interface)
    }

    pub fn save_hub_keypair(&self, keypair: &HubKeyPair) -> Result<()> {
        self.put(Collection::Hub, HUB_KEYPAIR_KEY, keypair)
    }

    pub fn save_global_settings(&self, settings: &GlobalSettings) -> Result<()> {
        self.put(Collection::Hub, GLOBAL_SETTINGS_KEY, settings)
    }

    // ========================================================================
    // Peers
    // ========================================================================

    pub fn list_peers(&self) -> Result<Vec<Peer>> {
        self.store
            .read_all(Collection::Peers)?
            .iter()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|e| Error::Store(format!("cannot decode peer record: {}", e)))
            })
            .collect()
    }

    pub fn get_peer(&self, id: &str) -> Result<Peer> {
        self.require(Collection::Peers, id)
    }

    pub fn save_peer(&self, peer: &Peer) -> Result<()> {
        self.put(Collection::Peers, &peer.id, peer)
    }

    pub fn delete_peer(&self, id: &str) -> Result<()> {
        if self.store.delete(Collection::Peers, id)? {
            Ok(())
        } else {
            Err(Error::not_found("peer", id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use chrono::Utc;

    fn records() -> (Arc<MemoryStore>, HubRecords) {
        let store = Arc::new(MemoryStore::new());
        let records = HubRecords::new(store.clone());
        (store, records)
    }

    fn peer(id: &str) -> Peer {
        let kp = KeyPair::generate();
        Peer {
            id: id.to_string(),
            private_key: Some(kp.private_key),
            public_key: kp.public_key,
            preshared_key: None,
            name: id.to_string(),
            email: String::new(),
            allocated_ips: vec!["10.0.0.2/32".parse().unwrap()],
            allowed_ips: vec![],
            extra_allowed_ips: vec![],
            use_server_dns: false,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryStore::new();
        store.write(Collection::Peers, "a", "1").unwrap();
        store.write(Collection::Hub, "a", "2").unwrap();

        assert_eq!(store.read(Collection::Peers, "a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.read_all(Collection::Peers).unwrap(), vec!["1"]);
        assert_eq!(store.count(Collection::Hub), 1);

        assert!(store.delete(Collection::Peers, "a").unwrap());
        assert!(!store.delete(Collection::Peers, "a").unwrap());
        assert!(store.read(Collection::Peers, "a").unwrap().is_none());
    }

    #[test]
    fn test_peer_records() {
        let (store, records) = records();
        let p = peer("p1");
        records.save_peer(&p).unwrap();
        records.save_peer(&peer("p2")).unwrap();

        assert_eq!(records.get_peer("p1").unwrap(), p);
        assert_eq!(records.list_peers().unwrap().len(), 2);

        records.delete_peer("p1").unwrap();
        assert_eq!(store.count(Collection::Peers), 1);
    }

    #[test]
    fn test_missing_records_are_not_found() {
        let (_, records) = records();
        assert!(matches!(records.get_peer("nope"), Err(Error::NotFound { .. })));
        assert!(matches!(records.delete_peer("nope"), Err(Error::NotFound { .. })));
        assert!(matches!(records.get_hub_interface(), Err(Error::NotFound { .. })));
        assert!(records.find_global_settings().unwrap().is_none());
    }

    #[test]
    fn test_hub_keypair_round_trip() {
        let (_, records) = records();
        let kp = HubKeyPair::generate();
        records.save_hub_keypair(&kp).unwrap();
        assert_eq!(records.get_hub_keypair().unwrap(), kp);
    }

    #[test]
    fn test_corrupt_peer_record_is_store_error() {
        let (store, records) = records();
        store.write(Collection::Peers, "bad", "{not json").unwrap();
        let err = records.list_peers().unwrap_err();
        assert!(err.is_store_error());
    }
}
