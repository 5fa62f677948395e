use serde_json::json;
use sunmine::persistence::{PersistenceManager, PersistentState};

#[test]
fn default_state_values() {
    let s = PersistentState::default();
    assert!(!s.autocontrol);
    assert_eq!(s.target_power_pct, None);
    assert!(s.last_updated.is_none());
}

#[test]
fn load_save_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut mgr = PersistenceManager::new(&path);
    mgr.set("autocontrol", true).unwrap();
    mgr.set("target_power_pct", 70u8).unwrap();
    mgr.save().unwrap();
    assert!(!dir.path().join("state.json.tmp").exists());

    let mut mgr2 = PersistenceManager::new(&path);
    mgr2.load().unwrap();
    assert_eq!(mgr2.get::<bool>("autocontrol"), Some(true));
    assert_eq!(mgr2.get::<u8>("target_power_pct"), Some(70));
}

#[test]
fn update_merges_and_rejects_bad_types() {
    let dir = tempfile::tempdir().unwrap();
    let mut mgr = PersistenceManager::new(dir.path().join("s.json"));
    mgr.update(json!({"miner_power_state": "stopped", "unknown": 1}))
        .unwrap();
    assert_eq!(
        mgr.state().miner_power_state.as_deref(),
        Some("stopped")
    );
    assert!(mgr.update(json!({"target_power_pct": "lots"})).is_err());
}

#[test]
fn corrupt_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let mut mgr = PersistenceManager::new(&path);
    mgr.load().unwrap();
    assert_eq!(mgr.state(), &PersistentState::default());
}

#[test]
fn update_and_save_stamps_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mut mgr = PersistenceManager::new(&path);
    mgr.update_and_save(|s| s.autocontrol = true);
    assert!(mgr.state().last_updated.is_some());

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"autocontrol\": true"));
}
