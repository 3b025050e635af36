use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use classmon_common::{
    broker_payload, build_snapshot, clock, cycle::CYCLE_INTERVAL_MS, dispatch::ingest_record,
    AlertAction, AlertEngine, Channel, ClimateReading, DispatchTimers, NodeConfig, RawSample,
    SensorSnapshot,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    // Same fatal-at-boot rule as the device: refuse to run on partial config.
    config.validate().context("invalid node configuration")?;

    let (mqtt_host, mqtt_port) = split_broker_addr(&config.broker.server);
    let mut mqtt_options = MqttOptions::new("classmon-node-host", mqtt_host, mqtt_port);
    mqtt_options.set_credentials(config.broker.token.clone(), "");

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("broker poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    info!(
        "host simulation started; publishing to `{}` and posting to `{}`",
        config.broker.topic, config.ingest.url
    );

    let started = Instant::now();
    let mut tick: u64 = 0;
    let mut alert_engine = AlertEngine::new();
    let mut timers = DispatchTimers::new();
    let mut last_snapshot = SensorSnapshot::default();
    let mut interval = tokio::time::interval(Duration::from_millis(CYCLE_INTERVAL_MS));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);
        let now_ms = started.elapsed().as_millis() as u64;

        // Hardware integration point: replace the simulated sweep with the
        // DHT11/LDR/PIR drivers on the ESP target.
        let sample = simulated_sample(tick);
        let snapshot = build_snapshot(&sample, &last_snapshot, clock::format_local(Utc::now()));

        for action in alert_engine.tick(snapshot.motion, snapshot.light_pct, now_ms) {
            match action {
                AlertAction::BuzzerPulse => info!("buzzer pulse"),
                AlertAction::MotionLed(true) => info!("motion alert armed"),
                AlertAction::LightLed(true) => info!(
                    "low-light alert at {:.1}%",
                    snapshot.light_pct
                ),
                _ => {}
            }
        }

        if timers.due(Channel::Ingest, now_ms) {
            let record = ingest_record(&snapshot, config.device_label());
            match http
                .post(&config.ingest.url)
                .header("Content-Type", "application/json")
                .header("X-API-KEY", &config.ingest.key)
                .json(&record)
                .send()
                .await
                .and_then(|response| response.error_for_status())
            {
                Ok(_) => {
                    timers.record_success(Channel::Ingest, now_ms);
                    info!("ingest: snapshot delivered");
                }
                Err(err) => warn!("ingest send failed: {err}"),
            }
        }

        if timers.due(Channel::Broker, now_ms) {
            match mqtt
                .publish(
                    config.broker.topic.clone(),
                    QoS::AtLeastOnce,
                    false,
                    broker_payload(&snapshot),
                )
                .await
            {
                Ok(()) => {
                    timers.record_success(Channel::Broker, now_ms);
                    info!("broker: snapshot published");
                }
                Err(err) => warn!("broker publish failed: {err}"),
            }
        }

        last_snapshot = snapshot;
    }
}

fn load_config() -> anyhow::Result<NodeConfig> {
    if let Ok(path) = std::env::var("CLASSMON_CONFIG") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file `{path}`"))?;
        return serde_json::from_str(&raw).with_context(|| format!("invalid config in `{path}`"));
    }

    let mut config = NodeConfig::default();
    config.broker.server = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    config.broker.token = std::env::var("MQTT_TOKEN").unwrap_or_default();
    if let Ok(topic) = std::env::var("MQTT_TOPIC") {
        config.broker.topic = topic;
    }
    config.ingest.url = std::env::var("INGEST_URL").unwrap_or_default();
    config.ingest.key = std::env::var("INGEST_KEY").unwrap_or_default();
    Ok(config)
}

fn split_broker_addr(server: &str) -> (String, u16) {
    let server = server
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");
    match server.rsplit_once(':') {
        Some((host, port)) => (
            host.to_string(),
            port.parse::<u16>().unwrap_or(1883),
        ),
        None => (server.to_string(), 1883),
    }
}

fn simulated_sample(tick: u64) -> RawSample {
    RawSample {
        climate: Some(ClimateReading {
            temp_c: 24.0 + ((tick % 8) as f32) * 0.2,
            humidity: 48.0 + ((tick % 6) as f32) * 0.5,
        }),
        light_raw: Some(400 + ((tick % 12) as u16) * 320),
        sound_raw: Some(600 + ((tick % 7) as u16) * 180),
        motion: tick % 9 == 0,
    }
}
