//! Unix-socket transport tests

use foris_core::{MessageKind, Notifier};
use foris_router::ERR_INCORRECT_INPUT;
use foris_test_utils::{SocketDir, TestDaemon, DEFAULT_TIMEOUT};
use foris_transport::{RequestSender, UnixNotificationSender, UnixRequestSender, UnixSocketListener};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn update_request(lease_time: u64) -> Value {
    json!({
        "module": "lan",
        "kind": "request",
        "action": "update_settings",
        "data": {
            "mode": "managed",
            "mode_managed": {
                "router_ip": "10.1.0.3",
                "netmask": "255.252.0.0",
                "dhcp": {"enabled": true, "start": 10, "limit": 50, "lease_time": lease_time}
            }
        }
    })
}

fn get_settings() -> Value {
    json!({"module": "lan", "kind": "request", "action": "get_settings"})
}

#[tokio::test]
async fn test_get_settings() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let reply = client.request(&get_settings()).await;
    assert_eq!(reply.kind, MessageKind::Reply);
    assert_eq!(reply.module, "lan");
    assert_eq!(reply.action, "get_settings");

    let data = reply.data.unwrap();
    assert!(["managed", "unmanaged"].contains(&data["mode"].as_str().unwrap()));
    assert!(data["mode_managed"].is_object());
    assert!(data["mode_unmanaged"].is_object());
    assert!(data["interface_count"].as_u64().is_some());
}

#[tokio::test]
async fn test_update_settings_notifies_once() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let request = update_request(86401);

    let reply = client.request(&request).await;
    assert_eq!(reply.data, Some(json!({"result": true})));

    assert!(daemon.notifications().wait_for_count(1, DEFAULT_TIMEOUT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let notifications = daemon.notifications().messages();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, MessageKind::Notification);
    assert_eq!(notifications[0].module, "lan");
    assert_eq!(notifications[0].action, "update_settings");
    assert_eq!(notifications[0].data, Some(request["data"].clone()));
}

#[tokio::test]
async fn test_invalid_update_has_no_effect() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let before = client.request(&get_settings()).await;
    let reply = client.request(&update_request(119)).await;
    assert_eq!(reply.errors(), Some(vec![ERR_INCORRECT_INPUT]));

    let after = client.request(&get_settings()).await;
    assert_eq!(before.data, after.data);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(daemon.notifications().count(), 0);
}

#[tokio::test]
async fn test_unknown_module() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let reply = client
        .request(&json!({"module": "nosuch", "kind": "request", "action": "foo"}))
        .await;
    let errors = reply.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("nosuch"));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    client.send_raw(b"{not json").await;
    let reply = client.request(&get_settings()).await;
    assert_eq!(reply.kind, MessageKind::Reply);
    assert!(!reply.is_error());
}

#[tokio::test]
async fn test_replies_in_request_order() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    client.send(&get_settings()).await;
    client
        .send(&json!({"module": "router_notifications", "kind": "request", "action": "list"}))
        .await;

    assert_eq!(client.recv().await.module, "lan");
    assert_eq!(client.recv().await.module, "router_notifications");
}

#[tokio::test]
async fn test_notification_forwarded() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let notification = json!({
        "module": "router_notifications",
        "kind": "notification",
        "action": "create",
        "data": {"severity": "error", "id": "1518776436-2598", "new_count": 4}
    });

    client.send(&notification).await;
    assert!(daemon.notifications().wait_for_count(1, DEFAULT_TIMEOUT).await);
    let received = daemon.notifications().messages();
    assert_eq!(received[0].to_value(), notification);
}

#[tokio::test]
async fn test_identical_notifications_identical_bytes() {
    let daemon = TestDaemon::start().await;
    let path = daemon.notifications_path();
    let notifier = Notifier::new(Arc::new(UnixNotificationSender::new(&path)), None);

    notifier
        .try_notify("lan", "update_settings", Some(json!({"mode": "unmanaged"})))
        .await
        .unwrap();
    assert!(daemon.notifications().wait_for_count(1, DEFAULT_TIMEOUT).await);

    let identical = notifier
        .try_notify("lan", "update_settings", Some(json!({"mode": "unmanaged"})))
        .await;
    assert!(identical.is_ok());
    assert!(daemon.notifications().wait_for_count(2, DEFAULT_TIMEOUT).await);

    let messages = daemon.notifications().messages();
    assert_eq!(messages[0].to_bytes().unwrap(), messages[1].to_bytes().unwrap());
}

#[tokio::test]
async fn test_request_sender() {
    let daemon = TestDaemon::start().await;
    let sender = UnixRequestSender::new(daemon.socket_path());

    let request = foris_core::Message::request("lan", "get_settings", None);
    let first = sender.send(&request).await.unwrap();
    let second = sender.send(&request).await.unwrap();
    assert_eq!(first, second);
    sender.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_stale_socket_replaced_and_removed() {
    let dir = SocketDir::new();
    let path = dir.path("sub/controller.sock");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"stale").unwrap();

    let daemon = TestDaemon::start().await;
    let listener = UnixSocketListener::new(
        &path,
        daemon.router().clone(),
        daemon.notifier().clone(),
    );
    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(listener.serve(rx));

    let request = foris_core::Message::request("lan", "get_settings", None);
    let (socket, request) = (&path, &request);
    let up = foris_test_utils::wait_for(
        || async move { UnixRequestSender::new(socket).send(request).await.is_ok() },
        Duration::from_millis(10),
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(up);

    tx.send(true).unwrap();
    task.await.unwrap().unwrap();
    assert!(!path.exists());
}
