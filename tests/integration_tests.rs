mod common;

use common::{Reply, StubBroker, StubHub};
use hublink::{
    ConnectionConfig, ConnectionState, DeliveryToken, HttpMethod, HubTransport, LinkSettings,
    Message, PollingSettings, ProtocolKind, QualityOfService, ReceiverState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// End-to-end tests of the transport facade over both engines
#[cfg(test)]
mod integration_tests {
    use super::*;

    fn polling(hub: &Arc<StubHub>) -> HubTransport {
        let config = ConnectionConfig::new(
            "contoso.example.net",
            "thermostat-01",
            "SharedAccessSignature sr=abc",
        );
        HubTransport::polling(config, PollingSettings::default(), hub.clone())
            .expect("valid config")
    }

    fn persistent(broker: &Arc<StubBroker>, qos: QualityOfService) -> HubTransport {
        let config = ConnectionConfig::new(
            "contoso.example.net",
            "thermostat-01",
            "SharedAccessSignature sr=abc",
        )
            .with_gateway_host("mqtts://gateway.example.net");
        let settings = LinkSettings {
            qos,
            ..LinkSettings::default()
        };
        HubTransport::persistent_link(config, settings, broker.clone()).expect("valid config")
    }

    #[tokio::test]
    async fn test_polling_send_event_wire_format() {
        let hub = StubHub::new();
        let transport = polling(&hub);
        assert_eq!(transport.protocol(), ProtocolKind::Http);
        transport.connect().await.unwrap();

        let message = Message::new("22.4").with_property("sensor", "living-room").unwrap();
        transport.send_event(message).await.unwrap();

        let request = &hub.requests()[0];
        assert_eq!(hub.hosts(), vec!["contoso.example.net".to_string()]);
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/devices/thermostat-01/messages/events?api-version=2016-02-03");
        assert_eq!(request.header("authorization"), Some("SharedAccessSignature sr=abc"));
        assert_eq!(request.header("iothub-to"), Some("/devices/thermostat-01/messages/events"));
        assert!(request.header("user-agent").unwrap().starts_with("hublink/"));
        assert_eq!(request.header("sensor"), Some("living-room"));
        assert_eq!(request.body, b"22.4");
    }

    #[tokio::test]
    async fn test_polling_batch_omits_empty_properties() {
        let hub = StubHub::new();
        let transport = polling(&hub);
        transport.connect().await.unwrap();

        let batch = vec![
            Message::new("A"),
            Message::new("B").with_property("k", "v").unwrap(),
        ];
        transport.send_event_batch(&batch).await.unwrap();

        let request = &hub.requests()[0];
        assert_eq!(request.header("content-type"), Some("application/vnd.microsoft.iothub.json"));
        assert_eq!(
            String::from_utf8(request.body.clone()).unwrap(),
            r#"[{"body":"QQ=="},{"body":"Qg==","properties":{"k":"v"}}]"#
        );
    }

    #[tokio::test]
    async fn test_polling_batch_failure_is_all_or_nothing() {
        let hub = StubHub::new();
        hub.reply_status(400, "malformed batch");
        let transport = polling(&hub);
        transport.connect().await.unwrap();

        let result = transport
            .send_event_batch(&[Message::new("1"), Message::new("2"), Message::new("3")])
            .await;
        assert!(matches!(result, Err(hublink::HubError::Delivery(_))));
        assert_eq!(hub.request_count(), 1);
    }

    #[tokio::test]
    async fn test_polling_receive_and_settle_cycle() {
        let hub = StubHub::new();
        hub.queue_command("0f8fad5b", "reboot", &[("priority", "high")]);
        hub.queue_command("7c9e6679", "ping", &[]);
        let transport = polling(&hub);
        transport.connect().await.unwrap();

        let receiver = transport.get_receiver().await.unwrap();
        let first = receiver.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        let second = receiver.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first.data_as_string().as_deref(), Some("reboot"));
        assert_eq!(first.properties().get("priority"), Some("high"));
        assert_eq!(second.delivery_token(), Some(&DeliveryToken::Lock("7c9e6679".to_string())));
        assert_eq!(receiver.pending_settlements(), 2);

        transport.complete(&first).await.unwrap();
        transport.reject(&second).await.unwrap();

        let requests = hub.requests();
        let complete = &requests[2];
        assert_eq!(complete.method, HttpMethod::Delete);
        assert_eq!(
            complete.path,
            "/devices/thermostat-01/messages/devicebound/0f8fad5b?api-version=2016-02-03"
        );
        assert_eq!(complete.header("if-match"), Some("\"0f8fad5b\""));
        let reject = &requests[3];
        assert_eq!(reject.method, HttpMethod::Delete);
        assert!(reject.path.ends_with("/7c9e6679?api-version=2016-02-03&reject"));

        assert!(transport.complete(&first).await.unwrap_err().is_already_settled());
        assert!(transport.abandon(&second).await.unwrap_err().is_already_settled());
        assert_eq!(hub.request_count(), 4);
    }

    #[tokio::test]
    async fn test_polling_abandon_request() {
        let hub = StubHub::new();
        hub.queue_command("lock-a", "x", &[]);
        let transport = polling(&hub);
        transport.connect().await.unwrap();

        let receiver = transport.get_receiver().await.unwrap();
        let message = receiver.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        receiver.abandon(&message).await.unwrap();

        let abandon = hub.requests().pop().unwrap();
        assert_eq!(abandon.method, HttpMethod::Post);
        assert_eq!(
            abandon.path,
            "/devices/thermostat-01/messages/devicebound/lock-a/abandon?api-version=2016-02-03"
        );
    }

    #[tokio::test]
    async fn test_poll_is_bounded_by_timeout() {
        let hub = StubHub::new();
        hub.reply(Reply::NeverAnswer);
        let transport = polling(&hub);
        transport.connect().await.unwrap();
        let receiver = transport.get_receiver().await.unwrap();

        let started = Instant::now();
        let message = receiver.receive(Duration::from_secs(1)).await.unwrap();
        assert!(message.is_none());
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_persistent_link_options_and_publish() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtLeastOnce);
        transport.connect().await.unwrap();

        let options = broker.options().unwrap();
        assert_eq!(options.client_id, "thermostat-01");
        assert_eq!(options.username, "contoso.example.net/thermostat-01");
        assert_eq!(options.password, "SharedAccessSignature sr=abc");
        assert!(!options.clean_session);
        assert_eq!(options.port, 8883);
        assert!(options.use_tls);

        transport.send_event(Message::new("plain")).await.unwrap();
        transport
            .send_event(Message::new("tagged").with_property("alert", "on").unwrap())
            .await
            .unwrap();

        let published = broker.published();
        assert_eq!(published[0].0, "devices/thermostat-01/messages/events");
        assert_eq!(published[0].2, QualityOfService::AtLeastOnce);
        assert_eq!(published[1].0, "devices/thermostat-01/messages/events/alert=on");
    }

    #[tokio::test]
    async fn test_persistent_link_rejects_batch() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        transport.connect().await.unwrap();

        let result = transport.send_event_batch(&[Message::new("a")]).await;
        assert!(matches!(result, Err(hublink::HubError::UnsupportedOperation(_))));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_link_receiver_is_singleton() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        transport.connect().await.unwrap();

        let first = transport.get_receiver().await.unwrap();
        let second = transport.get_receiver().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            broker.subscriptions(),
            vec!["devices/thermostat-01/messages/devicebound".to_string()]
        );
    }

    #[tokio::test]
    async fn test_persistent_link_push_and_advisory_settlement() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        transport.connect().await.unwrap();
        let receiver = transport.get_receiver().await.unwrap();

        broker.push("devices/thermostat-01/messages/devicebound/mode=eco", b"set-mode");
        let message = receiver.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(message.payload(), b"set-mode");
        assert_eq!(message.properties().get("mode"), Some("eco"));

        transport.abandon(&message).await.unwrap();
        assert!(transport.complete(&message).await.unwrap_err().is_already_settled());
        assert_eq!(broker.published().len(), 0);
    }

    #[tokio::test]
    async fn test_no_callback_after_disconnect() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        transport.connect().await.unwrap();
        let receiver = transport.get_receiver().await.unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        receiver
            .set_message_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        broker.push("devices/thermostat-01/messages/devicebound", b"one");
        timeout(Duration::from_secs(1), async {
            while delivered.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("handler should fire while connected");

        transport.disconnect().await;
        assert!(broker.is_closed());
        assert_eq!(receiver.state(), ReceiverState::Closed);

        broker.push("devices/thermostat-01/messages/devicebound", b"two");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_gets_fresh_receiver() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        transport.connect().await.unwrap();
        let before = transport.get_receiver().await.unwrap();

        transport.disconnect().await;
        transport.connect().await.unwrap();
        let after = transport.get_receiver().await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(broker.open_count(), 2);
        assert_eq!(after.state(), ReceiverState::Active);
        transport.send_event(Message::new("back")).await.unwrap();
    }

    #[tokio::test]
    async fn test_link_loss_is_broadcast() {
        let broker = StubBroker::new();
        let transport = persistent(&broker, QualityOfService::AtMostOnce);
        let mut events = transport.connection_events();
        transport.connect().await.unwrap();

        broker.drop_link("connection reset by peer");

        let mut seen = Vec::new();
        while let Ok(Ok(state)) = timeout(Duration::from_secs(1), events.recv()).await {
            let lost = matches!(state, ConnectionState::Lost(_));
            seen.push(state);
            if lost {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Lost("connection reset by peer".to_string()),
            ]
        );
    }
}
