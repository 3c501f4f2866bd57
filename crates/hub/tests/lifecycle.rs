//! End-to-end peer lifecycle against the public engine API

use meshgate_common::{Collection, Database, Error, HubRecords, KeyPair, MemoryStore, PeerInput};
use meshgate_hub::{bootstrap, ClientConfigOptions, HubConfig, HubConfigOptions, PeerService};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread;

fn hub_config(dir: &Path, addresses: &[&str]) -> HubConfig {
    let mut config = HubConfig::default();
    config.store_path = dir.to_path_buf();
    config.interface.addresses = addresses.iter().map(|a| a.to_string()).collect();
    config.global.endpoint_address = "vpn.example.com".to_string();
    config.global.config_file_path = dir.join("wireguard").join("wg0.conf");
    config
}

fn service_on(records: HubRecords, config: &HubConfig) -> PeerService {
    bootstrap::initialize(&records, config).unwrap();
    PeerService::new(
        records,
        HubConfigOptions {
            include_disabled_peers: config.render.include_disabled_peers,
        },
    )
}

fn peer_input(name: &str) -> PeerInput {
    PeerInput {
        name: name.to_string(),
        allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        use_server_dns: true,
        enabled: true,
        ..Default::default()
    }
}

fn value_of<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let prefix = format!("{} = ", key);
    text.lines().find_map(|l| l.strip_prefix(prefix.as_str()))
}

#[test]
fn test_full_lifecycle_on_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = hub_config(dir.path(), &["10.252.1.1/24", "fd00:252::1/64"]);
    let db = Database::open(config.db_path()).unwrap();
    let service = service_on(HubRecords::new(Arc::new(db)), &config);
    let conf_path = config.global.config_file_path.clone();

    // Create
    let laptop = service.create_new(peer_input("laptop")).unwrap().into_result().unwrap();
    assert_eq!(laptop.allocated_ips.len(), 2);
    let hub_conf = std::fs::read_to_string(&conf_path).unwrap();
    assert!(hub_conf.contains(&laptop.public_key.to_string()));

    // Client config carries the hub identity and the peer's own addresses
    let data = service.get_peer(&laptop.id, &ClientConfigOptions::default()).unwrap();
    let client = data.client_config.unwrap();
    let hub = service.records().get_hub().unwrap();
    assert_eq!(value_of(&client, "PublicKey"), Some(hub.keypair.public_key.to_string().as_str()));
    assert_eq!(value_of(&client, "Address"), Some("10.252.1.2/32,fd00:252::2/128"));
    assert_eq!(value_of(&client, "Endpoint"), Some("vpn.example.com:51820"));
    assert_eq!(value_of(&client, "AllowedIPs"), Some("0.0.0.0/0,::/0"));

    // Edit
    let mut edit = PeerInput::from_peer(&laptop);
    edit.name = "work laptop".to_string();
    edit.allocated_ips = vec!["10.252.1.50/32".to_string()];
    let edited = service.edit_peer(&laptop.id, edit).unwrap().into_result().unwrap();
    assert_eq!(edited.peer.allocated_ips.len(), 1);
    let hub_conf = std::fs::read_to_string(&conf_path).unwrap();
    assert!(hub_conf.contains("AllowedIPs = 10.252.1.50/32"));

    // Freed addresses become available again
    let phone = service.create_new(peer_input("phone")).unwrap().value;
    assert_eq!(phone.allocated_ips[0].to_string(), "10.252.1.2/32");

    // Delete
    service.delete_peer(&laptop.id).unwrap().into_result().unwrap();
    let hub_conf = std::fs::read_to_string(&conf_path).unwrap();
    assert!(!hub_conf.contains(&laptop.public_key.to_string()));
    assert!(hub_conf.contains(&phone.public_key.to_string()));
    assert!(matches!(
        service.delete_peer(&laptop.id),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = hub_config(dir.path(), &["10.252.1.1/24"]);

    let (hub_key, peer) = {
        let db = Database::open(config.db_path()).unwrap();
        let service = service_on(HubRecords::new(Arc::new(db)), &config);
        let peer = service.create_new(peer_input("a")).unwrap().value;
        (service.records().get_hub_keypair().unwrap(), peer)
    };

    let db = Database::open(config.db_path()).unwrap();
    let service = service_on(HubRecords::new(Arc::new(db)), &config);
    assert_eq!(service.records().get_hub_keypair().unwrap(), hub_key);
    assert_eq!(service.list_peers().unwrap(), vec![peer.clone()]);

    let next = service.create_new(peer_input("b")).unwrap().value;
    assert_ne!(next.allocated_ips, peer.allocated_ips);
}

#[test]
fn test_concurrent_creates_get_distinct_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let config = hub_config(dir.path(), &["10.252.1.1/24", "fd00:252::1/64"]);
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(service_on(HubRecords::new(store.clone()), &config));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .create_new(peer_input(&format!("peer-{}", i)))
                    .unwrap()
                    .value
            })
        })
        .collect();

    let peers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(store.count(Collection::Peers), 16);

    let hub_ranges = service.records().get_hub_interface().unwrap().addresses;
    let mut seen: HashSet<IpAddr> = hub_ranges.iter().map(|n| n.ip()).collect();
    for peer in &peers {
        for net in &peer.allocated_ips {
            assert!(hub_ranges.iter().any(|r| r.contains(net.ip())));
            assert!(seen.insert(net.ip()), "{} handed out twice", net);
        }
    }
}

#[test]
fn test_concurrent_duplicate_public_key_accepted_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = hub_config(dir.path(), &["10.252.1.1/24"]);
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(service_on(HubRecords::new(store.clone()), &config));
    let key = KeyPair::generate().public_key.to_string();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            let key = key.clone();
            thread::spawn(move || {
                let mut input = peer_input(&format!("byok-{}", i));
                input.public_key = Some(key);
                service.create_new(input).map(|m| m.value)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateKey(_))));
    assert_eq!(store.count(Collection::Peers), 1);
}

#[test]
fn test_disabled_peers_kept_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = hub_config(dir.path(), &["10.252.1.1/24"]);
    config.render.include_disabled_peers = true;
    let service = service_on(HubRecords::new(Arc::new(MemoryStore::new())), &config);

    let mut input = peer_input("dormant");
    input.enabled = false;
    let peer = service.create_new(input).unwrap().value;

    let conf = service.render_hub_config().unwrap();
    assert!(conf.contains(&peer.public_key.to_string()));
    assert!(conf.lines().any(|l| l == "# Disabled"));
}

#[test]
fn test_apply_recovers_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = hub_config(dir.path(), &["10.252.1.1/24"]);
    let records = HubRecords::new(Arc::new(MemoryStore::new()));
    let service = service_on(records.clone(), &config);

    let good_path = config.global.config_file_path.clone();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let mut settings = records.get_global_settings().unwrap();
    settings.config_file_path = blocker.join("wg0.conf");
    records.save_global_settings(&settings).unwrap();

    let created = service.create_new(peer_input("pending")).unwrap();
    assert!(!created.is_applied());
    assert_eq!(service.list_peers().unwrap().len(), 1);

    settings.config_file_path = good_path.clone();
    records.save_global_settings(&settings).unwrap();
    service.apply_config().unwrap();
    let conf = std::fs::read_to_string(&good_path).unwrap();
    assert!(conf.contains(&created.value.public_key.to_string()));
}
