use std::rc::Rc;

use tripsync_core::{Action, ItemId};
use tripsync_engine::{SessionState, SyncStatus};
use tripsync_harness::{TestDevice, TestNetwork};
use tripsync_storage::SqliteStore;

fn gear(id: &str, label: &str) -> Action {
    Action::AddGearItem {
        id: ItemId::from(id),
        label: label.into(),
    }
}

#[test]
fn restart_resumes_trip_and_pushes_offline_edits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("device-a.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?;

    let mut net = TestNetwork::default();
    let b = net.add_device()?;
    let hub = Rc::clone(net.shared_hub());
    let clock = net.clock().clone();

    let device_id = {
        let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
        a.dispatch(&gear("g1", "Gloves"))?;
        let (code, token) = a.create_trip()?;
        net.device_mut(b).join(code.as_str(), token.as_str())?;
        a.device_id().ok_or("no identity")?
    };

    clock.advance(5_000);
    let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
    assert_eq!(a.gear_labels(), vec!["Gloves"]);

    // Edited before sync is back up.
    a.dispatch(&gear("g2", "Goggles"))?;
    a.resume()?;
    assert!(a.session.is_connected());
    assert_eq!(a.device_id(), Some(device_id));

    for _ in 0..20 {
        clock.advance(100);
        a.poll()?;
        net.poll_all()?;
    }
    assert_eq!(net.device(b).gear_labels(), vec!["Gloves", "Goggles"]);
    assert!(a.session.pending_slices().is_empty());
    Ok(())
}

#[test]
fn disconnected_trip_stays_disconnected_after_restart() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("device-a.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?;

    let net = TestNetwork::default();
    let hub = Rc::clone(net.shared_hub());
    let clock = net.clock().clone();

    let code = {
        let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
        let (code, _) = a.create_trip()?;
        a.disconnect();
        code
    };

    let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
    a.resume()?;
    assert_eq!(a.session.state(), SessionState::Disconnected);
    assert_eq!(a.session.status(), SyncStatus::Offline);
    assert_eq!(net.hub().members(&code).len(), 1);
    Ok(())
}

#[test]
fn resume_while_offline_connects_when_back_online() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("device-a.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?;

    let net = TestNetwork::default();
    let hub = Rc::clone(net.shared_hub());
    let clock = net.clock().clone();

    {
        let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
        a.create_trip()?;
    }

    let mut a = TestDevice::with_store(&hub, &clock, SqliteStore::open(path)?);
    a.go_offline()?;
    a.resume()?;
    assert!(!a.session.is_connected());
    assert_eq!(a.session.status(), SyncStatus::Offline);

    a.go_online()?;
    assert!(a.session.is_connected());
    assert_eq!(a.session.status(), SyncStatus::Synced);
    Ok(())
}
