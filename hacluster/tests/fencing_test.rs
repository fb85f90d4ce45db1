// Tests for fencing bootstrap gating and all-or-nothing coverage.

use hacluster::fencing::FencingConfigurator;
use hacluster::inventory::{InventoryNode, PowerParameters};
use hacluster::state::StateStore;
use hacluster::testing::{MockClusterManager, MockInventory};
use hacluster::{CharmConfig, HaError, Outcome};

fn inventory_node(hostname: &str) -> InventoryNode {
    InventoryNode {
        hostname: hostname.to_string(),
        system_id: Some(format!("id-{}", hostname)),
        power_type: Some("ipmi".to_string()),
        power_parameters: PowerParameters {
            power_address: Some("10.1.0.1".to_string()),
            power_user: Some("admin".to_string()),
            power_pass: Some("secret".to_string()),
        },
    }
}

fn config() -> CharmConfig {
    CharmConfig::new()
        .stonith_enabled(true)
        .inventory("http://maas.example.com", "ck:tk:ts")
        .corosync_key("c2VjcmV0")
        .build()
        .unwrap()
}

fn configured_store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::at(dir.path().join("configured"));
    store.mark_configured().unwrap();
    (dir, store)
}

#[tokio::test]
async fn test_noop_while_unconfigured() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::at(dir.path().join("configured"));
    let config = config();
    let manager = MockClusterManager::new();
    manager.set_nodes(&["node1"]);
    let inventory = MockInventory::with_nodes(vec![inventory_node("node1")]);

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    let outcome = fencing.configure().await.unwrap();

    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(manager.commands().is_empty());
}

#[tokio::test]
async fn test_noop_when_disabled() {
    let (_dir, store) = configured_store();
    let config = CharmConfig::new().corosync_key("c2VjcmV0").build().unwrap();
    let manager = MockClusterManager::new();

    let fencing = FencingConfigurator::new(&config, &manager, None, &store);
    let outcome = fencing.configure().await.unwrap();

    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(manager.commands().is_empty());
}

#[tokio::test]
async fn test_missing_inventory_configuration_is_fatal() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();

    let fencing = FencingConfigurator::new(&config, &manager, None, &store);
    let err = fencing.configure().await.unwrap_err();

    assert!(matches!(err, HaError::Configuration(_)));
    assert!(manager.commands().is_empty());
}

#[tokio::test]
async fn test_empty_inventory_is_fatal() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();
    manager.set_nodes(&["node1"]);
    let inventory = MockInventory::with_nodes(Vec::new());

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    let err = fencing.configure().await.unwrap_err();

    assert!(matches!(err, HaError::Inventory(_)));
}

#[tokio::test]
async fn test_unreachable_inventory_is_fatal() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();
    let inventory = MockInventory::unreachable();

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    assert!(fencing.configure().await.is_err());
}

#[tokio::test]
async fn test_incomplete_coverage_arms_nothing() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();
    manager.set_nodes(&["node1", "node2", "node3"]);
    let inventory = MockInventory::with_nodes(vec![
        inventory_node("node1"),
        inventory_node("node2"),
    ]);

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    let err = fencing.configure().await.unwrap_err();

    match err {
        HaError::FencingDerivation(node) => assert_eq!(node, "node3"),
        other => panic!("Expected FencingDerivation error, got {:?}", other),
    }
    // no partial fencing state: nothing created, nothing armed
    assert!(manager.commands().is_empty());
    assert!(manager.command_index("stonith-enabled=true").is_none());
}

#[tokio::test]
async fn test_full_coverage_creates_and_arms() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();
    manager.set_nodes(&["node1", "node2"]);
    manager.preexisting("res-stonith-node1");
    let inventory = MockInventory::with_nodes(vec![
        inventory_node("node1.maas.example.com"),
        inventory_node("node2.maas.example.com"),
    ]);

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    let outcome = fencing.configure().await.unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let commands = manager.commands();
    // node1 already covered, only node2 is created, then fencing is armed
    assert!(manager.command_index("primitive res-stonith-node1").is_none());
    assert!(manager
        .command_index("primitive res-stonith-node2 stonith:external/ipmi")
        .is_some());
    assert!(manager
        .command_index("location loc-res-stonith-node2 res-stonith-node2 -inf: node2")
        .is_some());
    assert_eq!(
        commands.last().map(String::as_str),
        Some("crm configure property stonith-enabled=true")
    );
}

#[tokio::test]
async fn test_rerun_skips_existing_coverage() {
    let (_dir, store) = configured_store();
    let config = config();
    let manager = MockClusterManager::new();
    manager.set_nodes(&["node1"]);
    let inventory = MockInventory::with_nodes(vec![inventory_node("node1")]);

    let fencing = FencingConfigurator::new(&config, &manager, Some(&inventory), &store);
    fencing.configure().await.unwrap();
    let first_run = manager.commands().len();

    fencing.configure().await.unwrap();
    // second pass only re-arms; the primitive and constraint are skipped
    assert_eq!(manager.commands().len(), first_run + 1);
    assert_eq!(
        manager.commands().last().map(String::as_str),
        Some("crm configure property stonith-enabled=true")
    );
}
