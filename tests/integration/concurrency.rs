//! Concurrency and ordering tests
//!
//! - Racing track requests for the same device end up at one worker
//! - Many groups and devices registered at once stay separate
//! - Messages from one sender are handled in send order

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use sensor_registry::{Inbox, Reply};

use crate::helpers::*;

#[tokio::test]
async fn test_concurrent_tracking_of_same_device_yields_one_worker() {
    let manager = spawn_manager();

    let mut tasks = vec![];
    for _ in 0..20 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.track("group", "device").await.unwrap()
        }));
    }

    let mut workers = HashSet::new();
    for task in tasks {
        workers.insert(task.await.unwrap().id());
    }

    assert_eq!(workers.len(), 1);
    assert_eq!(manager.device_list("group", 0).await.unwrap(), ids(&["device"]));
}

#[tokio::test]
async fn test_concurrent_registration_across_groups() {
    let manager = spawn_manager();

    let mut tasks = vec![];
    for group in 0..10 {
        for device in 0..10 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let handle = manager
                    .track(&format!("group{group}"), &format!("device{device}"))
                    .await
                    .unwrap();
                handle.record(0, (group * 10 + device) as f64).await.unwrap();
            }));
        }
    }

    for task in tasks {
        task.await.unwrap();
    }

    let expected: HashSet<String> = (0..10).map(|device| format!("device{device}")).collect();
    for group in 0..10 {
        let listed = manager.device_list(&format!("group{group}"), 0).await.unwrap();
        assert_eq!(listed, expected);
    }

    let device = manager.track("group3", "device7").await.unwrap();
    assert_eq!(device.temperature(1).await.unwrap(), Some(37.0));
}

#[tokio::test]
async fn test_records_from_one_sender_apply_in_order() {
    let group = spawn_group("group");
    let device = group.track("device").await.unwrap();

    let mut inbox = Inbox::new();
    let reply_to = inbox.reply_to();

    for request_id in 0..100 {
        device
            .record_temperature(request_id, request_id as f64, &reply_to)
            .await
            .unwrap();
    }
    device.read_temperature(100, &reply_to).await.unwrap();

    for expected in 0..100 {
        match inbox.recv_timeout(WAIT).await.unwrap() {
            Reply::TemperatureRecorded { request_id } => assert_eq!(request_id, expected),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    match inbox.recv_timeout(WAIT).await.unwrap() {
        Reply::RespondTemperature { request_id, value } => {
            assert_eq!(request_id, 100);
            assert_eq!(value, Some(99.0));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn test_mailbox_backpressure_does_not_lose_requests() {
    let group = spawn_group("group");

    // more requests in flight than the mailbox holds
    let mut tasks = vec![];
    for device in 0..200 {
        let group = group.clone();
        tasks.push(tokio::spawn(async move {
            group.track(&format!("device{device}")).await.unwrap()
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(group.device_list(0).await.unwrap().len(), 200);
}
