//! Registration and routing of track requests
//!
//! - Devices are created on first use and reused afterwards
//! - The device itself answers the original caller
//! - Requests for another group are dropped without a reply

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use sensor_registry::{Inbox, RegistryError, Reply, RequestTrackDevice};

use crate::helpers::*;

#[tokio::test]
async fn test_register_device_actor() {
    let group = spawn_group("group");
    let mut inbox = Inbox::new();

    group
        .track_device(RequestTrackDevice::new("group", "device1"), &inbox.reply_to())
        .await
        .unwrap();
    let device1 = expect_registered(&mut inbox).await;

    group
        .track_device(RequestTrackDevice::new("group", "device2"), &inbox.reply_to())
        .await
        .unwrap();
    let device2 = expect_registered(&mut inbox).await;

    assert_ne!(device1, device2);
    assert_eq!(device1.device_id(), "device1");
    assert_eq!(device2.device_id(), "device2");
    assert_eq!(device1.group_id(), "group");

    // both devices are live and answer on their own
    device1.record(0, 1.0).await.unwrap();
    device2.record(1, 2.0).await.unwrap();
    assert_eq!(device1.temperature(2).await.unwrap(), Some(1.0));
    assert_eq!(device2.temperature(3).await.unwrap(), Some(2.0));
}

#[tokio::test]
async fn test_ignore_requests_for_wrong_group_id() {
    let group = spawn_group("group");
    let mut inbox = Inbox::new();

    group
        .track_device(RequestTrackDevice::new("wrongGroup", "device1"), &inbox.reply_to())
        .await
        .unwrap();

    let result = inbox.recv_timeout(std::time::Duration::from_millis(100)).await;
    assert_matches!(result, Err(RegistryError::Timeout { .. }));

    assert!(group.device_list(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_return_same_actor_for_same_device_id() {
    let group = spawn_group("group");

    let first = group.track("device1").await.unwrap();
    let second = group.track("device1").await.unwrap();

    assert_eq!(first, second);

    // shared reading state
    first.record(0, 21.5).await.unwrap();
    assert_eq!(second.temperature(1).await.unwrap(), Some(21.5));
}

#[tokio::test]
async fn test_distinct_devices_have_independent_readings() {
    let manager = spawn_manager();

    let device1 = manager.track("group", "device1").await.unwrap();
    let device2 = manager.track("group", "device2").await.unwrap();
    let other = manager.track("other", "device1").await.unwrap();

    assert_ne!(device1, device2);
    assert_ne!(device1, other);

    device1.record(0, 10.0).await.unwrap();

    assert_eq!(device1.temperature(1).await.unwrap(), Some(10.0));
    assert_eq!(device2.temperature(2).await.unwrap(), None);
    assert_eq!(other.temperature(3).await.unwrap(), None);
}

#[tokio::test]
async fn test_list_active_devices() {
    let group = spawn_group("group");

    group.track("device1").await.unwrap();
    group.track("device2").await.unwrap();

    let mut inbox = Inbox::new();
    group.request_device_list(0, &inbox.reply_to()).await.unwrap();

    assert_matches!(
        inbox.recv_timeout(WAIT).await.unwrap(),
        Reply::ReplyDeviceList { request_id: 0, ids: listed } if listed == ids(&["device1", "device2"])
    );
}

#[tokio::test]
async fn test_manager_routes_to_one_group_per_group_id() {
    let manager = spawn_manager();
    let mut inbox = Inbox::new();

    for (group_id, device_id) in [("group1", "device1"), ("group1", "device2"), ("group2", "device1")] {
        manager
            .track_device(RequestTrackDevice::new(group_id, device_id), &inbox.reply_to())
            .await
            .unwrap();
        let device = expect_registered(&mut inbox).await;
        assert_eq!(device.group_id(), group_id);
        assert_eq!(device.device_id(), device_id);
    }

    assert_eq!(
        manager.device_list("group1", 0).await.unwrap(),
        ids(&["device1", "device2"])
    );
    assert_eq!(manager.device_list("group2", 1).await.unwrap(), ids(&["device1"]));
    assert!(manager.device_list("group3", 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reply_goes_to_original_requester_only() {
    let manager = spawn_manager();
    let mut requester = Inbox::new();
    let mut bystander = Inbox::new();

    manager
        .track_device(RequestTrackDevice::new("group", "device"), &requester.reply_to())
        .await
        .unwrap();
    expect_registered(&mut requester).await;

    // a later request from someone else only answers them
    manager
        .track_device(RequestTrackDevice::new("group", "device"), &bystander.reply_to())
        .await
        .unwrap();
    expect_registered(&mut bystander).await;

    assert!(requester.try_recv().is_none());
}
