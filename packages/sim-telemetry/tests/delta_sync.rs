use sim_telemetry::binder::UnconnectedDirectory;
use sim_telemetry::transport::{inproc_channel, InProcessSource};
use sim_telemetry::{
    ConsumerLoop, EventKey, ProducerConfig, ProducerNode, Sample, Serializer,
};
use std::time::Duration;

fn producer_config(format: &str) -> ProducerConfig {
    let config = format!(
        r#"{{
            "communication": {{ "format": "{}" }},
            "timestep": 0.5,
            "total_time": 4.0,
            "continuous": {{
                "reward_in": {{ "keys": ["curr", "mean"] }},
                "rates_in": {{ "keys": ["rate_0"] }}
            }},
            "events": {{
                "activity_in": {{ "keys": 6 }},
                "pattern_in": {{ "keys": 8, "aggregate": 4 }}
            }}
        }}"#,
        format
    );
    serde_json::from_str(&config).unwrap()
}

fn pipeline(format: &str) -> (ProducerNode, ConsumerLoop) {
    let config = producer_config(format);
    let (sink, source) = inproc_channel("inproc://pipeline");
    let producer =
        ProducerNode::from_config(&config, Box::new(UnconnectedDirectory), Box::new(sink)).unwrap();
    let consumer = consumer_for(source, config.communication.serializer().unwrap());
    (producer, consumer)
}

fn consumer_for(source: InProcessSource, codec: Serializer) -> ConsumerLoop {
    let mut consumer = ConsumerLoop::new(Duration::ZERO, Duration::from_millis(1));
    consumer.subscribe(Box::new(source), "", codec);
    consumer
}

/// Step the producer through `times`, feeding a deterministic signal
async fn drive(producer: &mut ProducerNode, times: &[f64]) {
    for &t in times {
        producer.write_continuous("reward_in", &[t, t / 2.0]).unwrap();
        producer.write_continuous("rates_in", &[10.0 * t]).unwrap();
        producer.deliver_event("activity_in", 1, t - 0.25).unwrap();
        producer.deliver_event("pattern_in", 5, t - 0.1).unwrap();
        producer.step(t).await.unwrap();
    }
}

#[tokio::test]
async fn test_consumer_rebuilds_producer_series() {
    for format in Serializer::names() {
        let (mut producer, mut consumer) = pipeline(format);
        let times = [0.5, 1.0, 1.5, 2.0, 2.5];
        drive(&mut producer, &times).await;

        let report = consumer.tick(0).await;
        assert_eq!(report.delivered, times.len(), "format {}", format);

        let receiver = consumer.receiver();
        let receiver = receiver.read();
        let expected: Vec<Sample> = times.iter().map(|&t| Sample::new(t, t / 2.0)).collect();
        assert_eq!(receiver.get_cont_data(&["mean"], None)[0], expected.as_slice());

        let spikes = receiver.get_event_data(&[EventKey::new("activity_in", 1)], None);
        let expected: Vec<f64> = times.iter().map(|t| t - 0.25).collect();
        assert_eq!(spikes[0], expected.as_slice());

        // indices 4..8 of pattern_in share buffer 1
        let aggregated = receiver.get_event_data(&[EventKey::new("pattern_in", 1)], None);
        assert_eq!(aggregated[0].len(), times.len());
        assert_eq!(
            receiver.continuous_keys(),
            vec!["curr", "mean", "rate_0"]
        );
    }
}

#[tokio::test]
async fn test_producer_restart_resets_consumer_history() {
    let (mut producer, mut consumer) = pipeline("json");

    drive(&mut producer, &[5.0, 10.0, 15.0]).await;
    consumer.tick(0).await;
    assert_eq!(consumer.receiver().read().max_time(), Some(15.0));

    drive(&mut producer, &[3.0, 4.0]).await;
    consumer.tick(0).await;

    let receiver = consumer.receiver();
    let receiver = receiver.read();
    assert_eq!(receiver.min_time(), Some(3.0));
    assert_eq!(receiver.max_time(), Some(4.0));
    assert_eq!(receiver.restart_count(), 1);
    let curr: Vec<f64> = receiver.get_cont_data(&["curr"], None)[0]
        .iter()
        .map(|s| s.time)
        .collect();
    assert_eq!(curr, vec![3.0, 4.0]);
}

#[tokio::test]
async fn test_windowed_reads_and_truncation_after_transport() {
    let (mut producer, mut consumer) = pipeline("msgpack");
    let times: Vec<f64> = (1..=8).map(|i| i as f64 * 0.5).collect();
    drive(&mut producer, &times).await;
    consumer.tick(0).await;

    let receiver = consumer.receiver();
    {
        let receiver = receiver.read();
        let window = receiver.get_cont_data(&["rate_0"], Some((1.0, 2.5)));
        let values: Vec<f64> = window[0].iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 15.0, 20.0]);
    }

    let report = receiver.write().truncate(Some(3.0), None);
    // 3 continuous channels lose 5 samples each, 2 event trains 6 events each
    assert_eq!(report.discarded, 3 * 5 + 2 * 6);
    assert_eq!(receiver.read().get_cont_data(&["curr"], None)[0][0].time, 3.0);
}

#[tokio::test]
async fn test_run_honours_total_time_end_to_end() {
    let (mut producer, mut consumer) = pipeline("simd-json");
    let stats = producer
        .run(sim_telemetry::producer::simulation_clock(0.5))
        .await
        .unwrap();
    assert_eq!(stats.ticks, 8);

    consumer.tick(0).await;
    let receiver = consumer.receiver();
    let receiver = receiver.read();
    assert_eq!(receiver.min_time(), Some(0.5));
    assert_eq!(receiver.max_time(), Some(4.0));
    assert!(receiver.event_keys().is_empty());
}
