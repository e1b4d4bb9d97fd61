mod common;

use common::{msg_types, options, record, retained, start, start_with, Op};
use mqtt_adapter::bridge::{BridgeSettings, ConnectionState};
use mqtt_adapter::bus::{events, LocalBus, Message, MessageBus};
use mqtt_adapter::features::{FeatureId, SwitchState};
use mqtt_adapter::mqtt::config::SessionSettings;
use serde_json::json;

#[tokio::test]
async fn mic_status_response_publishes_retained_state() {
    let bridge = start(&[FeatureId::MicMute]);
    bridge.broker.ack().await;
    bridge.settle().await;
    bridge.broker.clear();

    let response = Message::new(events::MIC_STATUS_RESPONSE).with_data(json!({ "muted": true }));
    bridge.bus.emit(response).unwrap();
    bridge.settle().await;

    assert_eq!(
        bridge.broker.ops(),
        vec![retained("mycroft/mic_mute/state", "ON")]
    );
    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.shadow.get(&FeatureId::MicMute), Some(&SwitchState::On));
    assert_eq!(status.states_published, 1);
}

#[tokio::test]
async fn mic_mute_off_unmutes_then_queries_status() {
    let bridge = start(&[FeatureId::MicMute]);
    let seen = record(&bridge.bus, &[events::MIC_UNMUTE, events::MIC_GET_STATUS]);
    bridge.broker.ack().await;
    bridge.settle().await;
    seen.lock().clear();

    bridge.broker.deliver("mycroft/mic_mute/set", b"OFF").await;
    bridge.settle().await;

    assert_eq!(
        msg_types(&seen),
        vec!["mycroft.mic.unmute", "mycroft.mic.get_status"]
    );
}

#[tokio::test]
async fn invalid_payload_is_rejected_and_router_keeps_going() {
    let bridge = start(&[FeatureId::VolumeMute]);
    let seen = record(&bridge.bus, &[events::VOLUME_MUTE, events::VOLUME_UNMUTE]);
    bridge.broker.ack().await;

    bridge.broker.deliver("mycroft/vol_mute/set", b"LOUD").await;
    bridge.settle().await;
    assert!(seen.lock().is_empty());

    bridge.broker.deliver("mycroft/vol_mute/set", b"ON").await;
    bridge.settle().await;
    assert_eq!(msg_types(&seen), vec!["mycroft.volume.mute"]);
    assert_eq!(seen.lock()[0].data, json!({ "speak_message": false }));

    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.messages_received, 2);
    assert_eq!(status.commands_rejected, 1);
    assert_eq!(status.commands_handled, 1);
    assert!(status.last_activity.is_some());
}

#[tokio::test]
async fn connect_advertises_subscribes_then_goes_online() {
    let bridge = start(&[FeatureId::MicMute, FeatureId::ListenButton]);
    bridge.broker.ack().await;
    bridge.settle().await;

    let ops = bridge.broker.ops();
    assert_eq!(ops.len(), 6, "{:?}", ops);
    assert_eq!(
        ops[0],
        Op::Connect {
            session: 1,
            host: "localhost".to_string()
        }
    );
    assert!(matches!(&ops[1], Op::Publish { topic, retain: true, .. }
        if topic == "homeassistant/switch/42mic_mute/config"));
    assert!(matches!(&ops[2], Op::Publish { topic, retain: true, .. }
        if topic == "homeassistant/button/42listen_button/config"));
    assert_eq!(ops[3], Op::Subscribe("mycroft/mic_mute/set".to_string()));
    assert_eq!(ops[4], Op::Subscribe("mycroft/listen_button".to_string()));
    assert_eq!(ops[5], retained("mycroft/available", "ONLINE"));

    let will = &bridge.broker.wills()[0];
    assert_eq!(will.topic, "mycroft/available");
    assert_eq!(will.payload, "OFFLINE");
    assert!(will.retain);

    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.connection_state, ConnectionState::Connected);
}

#[tokio::test]
async fn discovery_document_describes_the_switch() {
    let bridge = start(&[FeatureId::MicMute]);
    bridge.broker.ack().await;
    bridge.settle().await;

    let Op::Publish { payload, .. } = &bridge.broker.ops()[1] else {
        panic!("expected discovery publish");
    };
    let document: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(document["command_topic"], "mycroft/mic_mute/set");
    assert_eq!(document["state_topic"], "mycroft/mic_mute/state");
    assert_eq!(document["uniq_id"], "42mic_mute");
    assert_eq!(document["pl_on"], "ON");
    assert_eq!(document["pl_off"], "OFF");
    assert_eq!(document["availability_topic"], "mycroft/available");
    assert_eq!(document["device"]["identifiers"], json!(["42"]));
}

#[tokio::test]
async fn shutdown_waits_for_offline_and_disconnect_to_flush() {
    let bridge = start(&[FeatureId::MicMute]);
    bridge.broker.ack().await;
    bridge.settle().await;
    bridge.broker.clear();

    bridge.handle.shutdown().await.unwrap();
    bridge.task.await.unwrap();

    assert_eq!(
        bridge.broker.ops(),
        vec![
            retained("mycroft/available", "OFFLINE"),
            Op::Disconnect { session: 1 },
            Op::Drain,
        ]
    );
}

#[tokio::test]
async fn startup_queries_mic_status() {
    let bus = LocalBus::new();
    let seen = record(&bus, &[events::MIC_GET_STATUS]);
    let bridge = start_with(options(&[FeatureId::MicMute]), bus);
    bridge.settle().await;

    assert_eq!(msg_types(&seen), vec!["mycroft.mic.get_status"]);
}

#[tokio::test]
async fn sensor_states_are_published_once_connected() {
    let bridge = start(&[FeatureId::Speaking, FeatureId::Listening]);
    bridge.bus.emit(Message::new(events::AUDIO_OUTPUT_START)).unwrap();
    bridge.settle().await;
    assert_eq!(bridge.broker.ops().len(), 1);

    bridge.broker.ack().await;
    bridge.settle().await;

    let ops = bridge.broker.ops();
    let tail = &ops[ops.len() - 3..];
    assert_eq!(
        tail,
        &[
            retained("mycroft/available", "ONLINE"),
            retained("mycroft/speaking/state", "ON"),
            retained("mycroft/listening/state", "OFF"),
        ]
    );
}

#[tokio::test]
async fn reconnect_announces_again() {
    let bridge = start(&[FeatureId::ListenButton]);
    bridge.broker.ack().await;
    bridge.broker.drop_connection().await;
    bridge.settle().await;
    assert_eq!(
        bridge.handle.status().await.unwrap().connection_state,
        ConnectionState::Disconnected
    );
    bridge.broker.clear();

    bridge.broker.ack().await;
    bridge.settle().await;
    let ops = bridge.broker.ops();
    assert_eq!(ops.len(), 3, "{:?}", ops);
    assert_eq!(ops[1], Op::Subscribe("mycroft/listen_button".to_string()));
    assert_eq!(ops[2], retained("mycroft/available", "ONLINE"));
}

#[tokio::test]
async fn reconfigure_replaces_the_session() {
    let bridge = start(&[FeatureId::ListenButton]);
    let seen = record(&bridge.bus, &[events::MIC_LISTEN]);
    bridge.broker.ack().await;
    bridge.settle().await;
    bridge.broker.clear();

    let settings = BridgeSettings {
        session: SessionSettings {
            host: "broker.lan".to_string(),
            ..SessionSettings::default()
        },
        advertise: false,
    };
    bridge.handle.reconfigure(settings).await.unwrap();

    assert_eq!(
        bridge.broker.ops(),
        vec![
            retained("mycroft/available", "OFFLINE"),
            Op::Disconnect { session: 1 },
            Op::Drain,
            Op::Connect {
                session: 2,
                host: "broker.lan".to_string()
            },
        ]
    );

    // The replaced session can no longer inject commands
    let stale = bridge.broker.sink(0);
    stale
        .send(mqtt_adapter::mqtt::MqttEvent::Message {
            topic: "mycroft/listen_button".to_string(),
            payload: b"PRESS".to_vec(),
        })
        .await;
    bridge.settle().await;
    assert!(seen.lock().is_empty());

    // Discovery is skipped once advertising is switched off
    bridge.broker.clear();
    bridge.broker.ack().await;
    bridge.broker.deliver("mycroft/listen_button", b"PRESS").await;
    bridge.settle().await;
    assert_eq!(
        bridge.broker.ops(),
        vec![
            Op::Subscribe("mycroft/listen_button".to_string()),
            retained("mycroft/available", "ONLINE"),
        ]
    );
    assert_eq!(msg_types(&seen), vec!["mycroft.mic.listen"]);
}

#[tokio::test]
async fn command_topic_injects_utterance() {
    let mut opts = options(&[FeatureId::Command]);
    opts.lang = "de-de".to_string();
    let bus = LocalBus::new();
    let seen = record(&bus, &[events::UTTERANCE]);
    let bridge = start_with(opts, bus);
    bridge.broker.ack().await;

    bridge.broker.deliver("mycroft/command", b"").await;
    bridge.broker.deliver("mycroft/command", "wie spät ist es".as_bytes()).await;
    bridge.settle().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].data,
        json!({ "utterances": ["wie spät ist es"], "lang": "de-de" })
    );
}

#[tokio::test]
async fn duplicate_feature_fails_at_startup() {
    let broker = common::FakeBroker::default();
    let identity = mqtt_adapter::identity::DeviceIdentity::with_fingerprint(
        Box::new(mqtt_adapter::identity::MemoryIdentityStore::default()),
        || "1".to_string(),
    );
    let result = mqtt_adapter::bridge::Bridge::new(
        options(&[FeatureId::MicMute, FeatureId::MicMute]),
        std::sync::Arc::new(identity),
        std::sync::Arc::new(LocalBus::new()),
        broker.connector(),
    );
    assert!(matches!(
        result,
        Err(mqtt_adapter::BridgeError::DuplicateFeature(FeatureId::MicMute))
    ));
}

#[tokio::test]
async fn reconfigure_republishes_state_to_the_new_broker() {
    let bridge = start(&[FeatureId::Speaking, FeatureId::Listening]);
    bridge.broker.ack().await;
    bridge.bus.emit(Message::new(events::AUDIO_OUTPUT_START)).unwrap();
    bridge.settle().await;

    let settings = BridgeSettings {
        session: SessionSettings {
            host: "broker.lan".to_string(),
            ..SessionSettings::default()
        },
        advertise: false,
    };
    bridge.handle.reconfigure(settings).await.unwrap();
    bridge.broker.clear();

    bridge.broker.ack().await;
    bridge.settle().await;
    assert_eq!(
        bridge.broker.ops(),
        vec![
            retained("mycroft/available", "ONLINE"),
            retained("mycroft/speaking/state", "ON"),
            retained("mycroft/listening/state", "OFF"),
        ]
    );
}
