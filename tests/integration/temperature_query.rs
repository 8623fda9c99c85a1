//! All-temperatures queries across a group

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use sensor_registry::{Inbox, Reply, TemperatureReading};

use crate::helpers::*;

#[tokio::test]
async fn test_collect_temperatures_from_all_active_devices() {
    let manager = spawn_manager();

    let device1 = manager.track("group", "device1").await.unwrap();
    let device2 = manager.track("group", "device2").await.unwrap();
    manager.track("group", "device3").await.unwrap();

    device1.record(0, 1.0).await.unwrap();
    device2.record(1, 2.0).await.unwrap();

    let temperatures = manager.all_temperatures("group", 2).await.unwrap();

    assert_eq!(
        temperatures,
        HashMap::from([
            ("device1".to_string(), TemperatureReading::Temperature(1.0)),
            ("device2".to_string(), TemperatureReading::Temperature(2.0)),
            (
                "device3".to_string(),
                TemperatureReading::TemperatureNotAvailable
            ),
        ])
    );
}

#[tokio::test]
async fn test_query_skips_devices_already_untracked() {
    let group = spawn_group("group");

    let stopped = group.track("device1").await.unwrap();
    group.track("device2").await.unwrap();

    stopped.stop().await;
    stopped.terminated().await;
    assert_eq!(wait_for_devices(&group, &["device2"]).await, ids(&["device2"]));

    let temperatures = group.all_temperatures(0).await.unwrap();
    assert_eq!(
        temperatures,
        HashMap::from([(
            "device2".to_string(),
            TemperatureReading::TemperatureNotAvailable
        )])
    );
}

#[tokio::test]
async fn test_query_replies_carry_their_request_id() {
    let group = spawn_group("group");
    let device = group.track("device").await.unwrap();
    device.record(0, 7.0).await.unwrap();

    let mut inbox = Inbox::new();
    group.request_all_temperatures(10, &inbox.reply_to()).await.unwrap();
    group.request_all_temperatures(11, &inbox.reply_to()).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        match inbox.recv_timeout(WAIT).await.unwrap() {
            Reply::RespondAllTemperatures {
                request_id,
                temperatures,
            } => {
                assert_eq!(
                    temperatures.get("device"),
                    Some(&TemperatureReading::Temperature(7.0))
                );
                seen.push(request_id);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    seen.sort();
    assert_eq!(seen, vec![10, 11]);
}

#[tokio::test]
async fn test_query_for_empty_or_unknown_group() {
    let manager = spawn_manager();

    assert!(manager.all_temperatures("nobody", 0).await.unwrap().is_empty());

    let group = spawn_group("empty");
    assert!(group.all_temperatures(1).await.unwrap().is_empty());
}
