use cucumber::{given, then, when};

use crate::gherkin_bridge::ProbeWorld;
use crate::kafka::CloudEvent;

#[given(regex = r#"^topic "([^"]+)" is ready$"#)]
async fn topic_is_ready(world: &mut ProbeWorld, topic: String) {
    world.active_topic = Some(topic);
}

#[when(regex = r#"^I produce an event with correlation id "([^"]+)" and type "([^"]+)"$"#)]
async fn produce_event(world: &mut ProbeWorld, correlation_id: String, event_type: String) {
    let Some(topic) = world.active_topic.clone() else {
        panic!("no active topic; use a preceding `topic \"...\" is ready` step");
    };
    let event = CloudEvent::new(
        uuid::Uuid::new_v4().to_string(),
        "probe",
        event_type,
        "v1",
        correlation_id.clone(),
    );
    let key = event.to_key_bytes().expect("CloudEvent key encoding");
    world.streams.produce(world.test_id, &topic, key, b"{}".to_vec());
    world.last_correlation_id = Some(correlation_id);
}

#[then(regex = r#"^topic "([^"]+)" should have received correlation id "([^"]+)"$"#)]
async fn assert_received(world: &mut ProbeWorld, topic: String, correlation_id: String) {
    let found = world
        .streams
        .lookup_registered(world.test_id, &topic, &correlation_id)
        .await;
    assert!(found.is_some(), "expected correlation id `{correlation_id}` on topic `{topic}`");
}

#[then(regex = r#"^nothing should have been received for correlation id "([^"]+)" on topic "([^"]+)"$"#)]
async fn assert_not_received(world: &mut ProbeWorld, correlation_id: String, topic: String) {
    let found = world
        .streams
        .lookup_registered(world.test_id, &topic, &correlation_id)
        .await;
    assert!(found.is_none(), "did not expect correlation id `{correlation_id}` on topic `{topic}`");
}
