//! Worker termination and recreation
//!
//! - Stopped and crashed devices drop out of their group
//! - The next track request recreates them with an empty reading
//! - Stopping a registry stops everything below it

use pretty_assertions::assert_eq;
use sensor_registry::ExitReason;

use crate::helpers::*;

#[tokio::test]
async fn test_list_active_devices_after_one_shuts_down() {
    let group = spawn_group("group");

    let to_shut_down = group.track("device1").await.unwrap();
    group.track("device2").await.unwrap();

    assert_eq!(
        group.device_list(0).await.unwrap(),
        ids(&["device1", "device2"])
    );

    to_shut_down.stop().await;
    assert_eq!(to_shut_down.terminated().await, ExitReason::Stopped);

    assert_eq!(wait_for_devices(&group, &["device2"]).await, ids(&["device2"]));
}

#[tokio::test]
async fn test_crashed_device_is_recreated_on_next_track() {
    let manager = spawn_manager();

    let crashed = manager.track("group", "device").await.unwrap();
    crashed.record(0, 30.0).await.unwrap();

    crashed.kill();
    assert_eq!(crashed.terminated().await, ExitReason::Killed);

    assert!(wait_for_group_devices(&manager, "group", &[]).await.is_empty());

    let recreated = manager.track("group", "device").await.unwrap();
    assert_ne!(crashed, recreated);
    assert_eq!(recreated.temperature(1).await.unwrap(), None);
}

#[tokio::test]
async fn test_track_right_after_crash_gets_a_live_device() {
    let group = spawn_group("group");

    let crashed = group.track("device").await.unwrap();
    crashed.kill();
    crashed.terminated().await;

    // no waiting for the group to notice
    let recreated = group.track("device").await.unwrap();
    assert_ne!(crashed, recreated);
    recreated.record(0, 5.0).await.unwrap();

    assert_eq!(wait_for_devices(&group, &["device"]).await, ids(&["device"]));
    assert_eq!(recreated.temperature(1).await.unwrap(), Some(5.0));
}

#[tokio::test]
async fn test_other_devices_survive_a_crash() {
    let group = spawn_group("group");

    let crashed = group.track("device1").await.unwrap();
    let survivor = group.track("device2").await.unwrap();
    survivor.record(0, 12.0).await.unwrap();

    crashed.kill();

    assert_eq!(wait_for_devices(&group, &["device2"]).await, ids(&["device2"]));
    assert_eq!(survivor.temperature(1).await.unwrap(), Some(12.0));
}

#[tokio::test]
async fn test_group_stop_stops_its_devices() {
    let group = spawn_group("group");
    let device1 = group.track("device1").await.unwrap();
    let device2 = group.track("device2").await.unwrap();

    group.stop().await;

    for handle in [&device1, &device2] {
        let reason = tokio::time::timeout(WAIT, handle.terminated()).await.unwrap();
        assert_eq!(reason, ExitReason::Stopped);
    }

    tokio::time::timeout(WAIT, group.terminated()).await.unwrap();
    assert!(group.is_closed());
}

#[tokio::test]
async fn test_manager_stop_stops_whole_tree() {
    let manager = spawn_manager();
    let devices = [
        manager.track("group1", "device1").await.unwrap(),
        manager.track("group1", "device2").await.unwrap(),
        manager.track("group2", "device1").await.unwrap(),
    ];

    manager.stop().await;
    assert_eq!(
        tokio::time::timeout(WAIT, manager.terminated()).await.unwrap(),
        ExitReason::Stopped
    );

    for device in &devices {
        let reason = tokio::time::timeout(WAIT, device.terminated()).await.unwrap();
        assert_eq!(reason, ExitReason::Stopped);
    }

    assert!(manager.track("group1", "device1").await.is_err());
}
