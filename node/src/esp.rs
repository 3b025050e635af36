use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use dht_sensor::dht11;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle, MonoTextStyleBuilder},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::{Ets, FreeRtos},
    gpio::{
        AnyIOPin, AnyOutputPin, Gpio34, Gpio35, IOPin, Input, InputOutput, Output, OutputPin,
        PinDriver, Pull,
    },
    i2c::{I2cConfig, I2cDriver},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, I2CDisplayInterface, Ssd1306};

use classmon_common::{
    alerts::BUZZER_PULSE_MS, broker_payload, build_snapshot, clock, connect_decision,
    connectivity::LINK_POLL_INTERVAL_MS, cycle_delay_ms, dispatch::ingest_record,
    parse_credentials_form, AlertAction, AlertEngine, Channel, ClimateReading, ConnectAttempt,
    CycleOutcome, DispatchTimers, IngestRecord, LinkEvent, LinkWatchdog, NodeConfig, RawSample,
    SensorSnapshot, StatusScreen, WifiCredentials,
};

const NVS_NAMESPACE: &str = "classmon";
const NVS_CONFIG_KEY: &str = "config_json";
const NVS_WIFI_KEY: &str = "wifi_json";

const PROVISIONING_AP_SSID: &str = "ClassMon-AP";
const PROVISIONING_AP_PASSWORD: &str = "classmon123";
const PROVISIONING_URL: &str = "192.168.4.1/config";

const MAX_HTTP_BODY: usize = 4096;
const RESTART_GRACE_MS: u64 = 2_000;
const CONFIG_ERROR_RESET_DELAY_MS: u64 = 10_000;
const RUNTIME_FAULT_RESET_DELAY_MS: u64 = 3_000;
const INGEST_TIMEOUT_SECS: u64 = 10;

const DHT_GPIO: i32 = 4;

const PROVISIONING_FORM_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Classroom Monitor WiFi Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:8px;padding:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text],input[type=password]{width:100%;padding:.5rem;box-sizing:border-box}
    button{padding:.55rem .9rem;margin-top:.8rem}.muted{color:#555}
  </style>
</head>
<body>
  <h1>Classroom Monitor WiFi Setup</h1>
  <p class="muted">Enter the network the node should join. The device restarts after saving.</p>
  <div class="card">
    <form method="post" action="/save">
      <label>WiFi SSID</label><input name="ssid" type="text">
      <label>WiFi Password</label><input name="password" type="password">
      <button type="submit">Save</button>
    </form>
  </div>
</body>
</html>
"#;

const PROVISIONING_SAVED_HTML: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Saved</title></head>
<body>
  <h1>WiFi configuration saved</h1>
  <p>The node restarts now and joins the configured network.</p>
</body>
</html>
"#;

const PROVISIONING_REJECTED_HTML: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Invalid submission</title></head>
<body>
  <h1>Invalid submission</h1>
  <p>Both fields are required. Go back and try again.</p>
</body>
</html>
"#;

type Oled = Ssd1306<
    I2CInterface<I2cDriver<'static>>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

enum WifiStartup {
    Connected(EspWifi<'static>),
    Provisioning(EspWifi<'static>),
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

struct SensorSuite<'d> {
    dht: PinDriver<'d, AnyIOPin, InputOutput>,
    pir: PinDriver<'d, AnyIOPin, Input>,
    adc: &'d AdcDriver<'d, ADC1>,
    light: AdcChannelDriver<'d, Gpio34, &'d AdcDriver<'d, ADC1>>,
    sound: AdcChannelDriver<'d, Gpio35, &'d AdcDriver<'d, ADC1>>,
    delay: Ets,
}

struct AlertOutputs<'d> {
    buzzer: PinDriver<'d, AnyOutputPin, Output>,
    motion_led: PinDriver<'d, AnyOutputPin, Output>,
    light_led: PinDriver<'d, AnyOutputPin, Output>,
}

struct BrokerSession {
    client: EspMqttClient<'static>,
}

impl<'d> SensorSuite<'d> {
    fn new(
        adc: &'d AdcDriver<'d, ADC1>,
        dht_pin: AnyIOPin,
        pir_pin: AnyIOPin,
        light_pin: Gpio34,
        sound_pin: Gpio35,
    ) -> anyhow::Result<Self> {
        let mut dht = PinDriver::input_output_od(dht_pin)?;
        dht.set_pull(Pull::Up)?;
        dht.set_high()?;

        let pir = PinDriver::input(pir_pin)?;

        let channel_config = AdcChannelConfig {
            attenuation: attenuation::DB_11,
            ..Default::default()
        };

        Ok(Self {
            dht,
            pir,
            adc,
            light: AdcChannelDriver::new(adc, light_pin, &channel_config)?,
            sound: AdcChannelDriver::new(adc, sound_pin, &channel_config)?,
            delay: Ets,
        })
    }

    /// One acquisition pass. Never fails: individual driver errors degrade
    /// to `None` so the snapshot builder can fall back to the last good
    /// values.
    fn read(&mut self) -> RawSample {
        RawSample {
            climate: self.read_climate(),
            light_raw: match self.adc.read(&mut self.light) {
                Ok(raw) => Some(raw),
                Err(err) => {
                    warn!("light adc read failed: {err}");
                    None
                }
            },
            sound_raw: match self.adc.read(&mut self.sound) {
                Ok(raw) => Some(raw),
                Err(err) => {
                    warn!("sound adc read failed: {err}");
                    None
                }
            },
            motion: self.pir.is_high(),
        }
    }

    fn read_climate(&mut self) -> Option<ClimateReading> {
        if let Err(err) = self.dht.set_high() {
            warn!("failed to release DHT11 line before read: {err}");
            return None;
        }

        match dht11::blocking::read(&mut self.delay, &mut self.dht) {
            Ok(reading) => Some(ClimateReading {
                temp_c: f32::from(reading.temperature),
                humidity: f32::from(reading.relative_humidity),
            }),
            Err(err) => {
                warn!("DHT11 read failed on GPIO{DHT_GPIO}: {err:?}");
                None
            }
        }
    }
}

impl AlertOutputs<'_> {
    fn new(
        buzzer_pin: AnyOutputPin,
        motion_led_pin: AnyOutputPin,
        light_led_pin: AnyOutputPin,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            buzzer: PinDriver::output(buzzer_pin)?,
            motion_led: PinDriver::output(motion_led_pin)?,
            light_led: PinDriver::output(light_led_pin)?,
        })
    }

    fn apply(&mut self, action: AlertAction) -> anyhow::Result<()> {
        match action {
            AlertAction::MotionLed(on) => set_level(&mut self.motion_led, on)?,
            AlertAction::LightLed(on) => set_level(&mut self.light_led, on)?,
            AlertAction::BuzzerPulse => {
                self.buzzer.set_high()?;
                FreeRtos::delay_ms(BUZZER_PULSE_MS as u32);
                self.buzzer.set_low()?;
            }
        }
        Ok(())
    }
}

fn set_level(pin: &mut PinDriver<'_, AnyOutputPin, Output>, on: bool) -> anyhow::Result<()> {
    if on {
        pin.set_high()?;
    } else {
        pin.set_low()?;
    }
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let Peripherals {
        modem,
        pins,
        i2c0,
        adc1,
        ..
    } = Peripherals::take()?;

    // Display comes up first: boot and config failures must be visible.
    let i2c = I2cDriver::new(
        i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )?;
    let mut display = Ssd1306::new(
        I2CDisplayInterface::new(i2c),
        DisplaySize128x64,
        DisplayRotation::Rotate0,
    )
    .into_buffered_graphics_mode();
    display
        .init()
        .map_err(|err| anyhow!("display init failed: {err:?}"))?;
    draw_rows(&mut display, &["Classroom monitor", "starting..."])?;

    let config = nvs_store
        .load_node_config()
        .unwrap_or_else(|err| {
            warn!("failed to load node config from NVS: {err:#}");
            None
        })
        .unwrap_or_else(default_node_config);

    if let Err(err) = config.validate() {
        warn!("invalid node configuration: {err}");
        fatal_error(
            &mut display,
            "Config error!",
            &err.to_string(),
            CONFIG_ERROR_RESET_DELAY_MS,
        );
    }

    let credentials = nvs_store.load_wifi_credentials().unwrap_or_else(|err| {
        warn!("failed to load wifi credentials from NVS: {err:#}");
        WifiCredentials::default()
    });

    let watchdog = Arc::new(Mutex::new(LinkWatchdog::new()));

    let startup = match connect_wifi(modem, sys_loop, nvs_partition, &credentials, &watchdog) {
        Ok(startup) => startup,
        Err(err) => {
            warn!("wifi interface fault: {err:#}");
            fatal_error(
                &mut display,
                "WiFi fault!",
                &format!("{err:#}"),
                RUNTIME_FAULT_RESET_DELAY_MS,
            );
        }
    };

    let wifi = match startup {
        WifiStartup::Connected(wifi) => wifi,
        WifiStartup::Provisioning(wifi) => {
            watchdog.lock().unwrap().enter_provisioning();
            run_provisioning_phase(&mut display, nvs_store, wifi);
        }
    };
    disable_wifi_power_save();

    let wifi_led = PinDriver::output(pins.gpio18.downgrade_output())?;
    let initial_events = watchdog.lock().unwrap().connection_established(monotonic_ms());
    let mqtt_reset = Arc::new(AtomicBool::new(false));
    spawn_link_watchdog(watchdog.clone(), mqtt_reset.clone(), wifi_led, initial_events)?;

    let adc = AdcDriver::new(adc1)?;
    let mut sensors = SensorSuite::new(
        &adc,
        pins.gpio4.downgrade(),
        pins.gpio27.downgrade(),
        pins.gpio34,
        pins.gpio35,
    )
    .context("failed to initialize sensor suite")?;
    let mut outputs = AlertOutputs::new(
        pins.gpio23.downgrade_output(),
        pins.gpio5.downgrade_output(),
        pins.gpio19.downgrade_output(),
    )?;

    let mut alert_engine = AlertEngine::new();
    let mut timers = DispatchTimers::new();
    let mut broker: Option<BrokerSession> = None;
    let mut last_snapshot = SensorSnapshot::default();

    // Keep services alive for the program lifetime.
    let _wifi = wifi;

    info!("supervisor loop started");

    loop {
        let outcome = match run_cycle(
            &config,
            &mut sensors,
            &mut outputs,
            &mut display,
            &mut alert_engine,
            &mut timers,
            &watchdog,
            &mqtt_reset,
            &mut broker,
            &last_snapshot,
        ) {
            Ok(snapshot) => {
                last_snapshot = snapshot;
                CycleOutcome::Completed
            }
            Err(err) => {
                warn!("cycle failed: {err:#}");
                // Redraw from the last committed snapshot, not fresh reads.
                let wifi_on = watchdog.lock().unwrap().state().is_connected();
                let screen = StatusScreen::build(&last_snapshot, wifi_on, false);
                if let Err(err) = draw_status(&mut display, &screen) {
                    warn!("failed to redraw last snapshot: {err:#}");
                }
                CycleOutcome::Faulted
            }
        };

        thread::sleep(Duration::from_millis(cycle_delay_ms(outcome)));
    }
}

/// Normal-phase iteration: acquisition, alerting, display, dispatch.
/// Connectivity is re-read at each use rather than cached across the cycle.
#[allow(clippy::too_many_arguments)]
fn run_cycle(
    config: &NodeConfig,
    sensors: &mut SensorSuite<'_>,
    outputs: &mut AlertOutputs<'_>,
    display: &mut Oled,
    alert_engine: &mut AlertEngine,
    timers: &mut DispatchTimers,
    watchdog: &Arc<Mutex<LinkWatchdog>>,
    mqtt_reset: &AtomicBool,
    broker: &mut Option<BrokerSession>,
    last_snapshot: &SensorSnapshot,
) -> anyhow::Result<SensorSnapshot> {
    let now_ms = monotonic_ms();
    let sample = sensors.read();
    let snapshot = build_snapshot(&sample, last_snapshot, clock::format_local(Utc::now()));

    for action in alert_engine.tick(snapshot.motion, snapshot.light_pct, now_ms) {
        outputs.apply(action)?;
    }

    let wifi_on = watchdog.lock().unwrap().state().is_connected();
    let screen = StatusScreen::build(
        &snapshot,
        wifi_on,
        wifi_on && timers.backend_reachable(now_ms),
    );
    draw_status(display, &screen)?;

    if watchdog.lock().unwrap().state().is_connected() {
        if mqtt_reset.swap(false, Ordering::Relaxed) {
            *broker = None;
        }

        if timers.due(Channel::Ingest, now_ms) {
            match post_ingest(config, &ingest_record(&snapshot, config.device_label())) {
                Ok(()) => {
                    timers.record_success(Channel::Ingest, now_ms);
                    info!("ingest: snapshot delivered");
                }
                Err(err) => {
                    warn!("ingest send failed: {err:#}");
                    if is_abandoned_connection(&err) {
                        request_reassociation();
                    }
                }
            }
        }

        if timers.due(Channel::Broker, now_ms) {
            match publish_broker(broker, config, &snapshot) {
                Ok(()) => {
                    timers.record_success(Channel::Broker, now_ms);
                    info!("broker: snapshot published");
                }
                Err(err) => {
                    warn!("broker publish failed: {err:#}");
                    *broker = None;
                }
            }
        }
    }

    Ok(snapshot)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    credentials: &WifiCredentials,
    watchdog: &Arc<Mutex<LinkWatchdog>>,
) -> anyhow::Result<WifiStartup> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let (ssid, password) = match connect_decision(credentials) {
        ConnectAttempt::StartProvisioning => {
            warn!("wifi credentials missing; entering provisioning AP mode");
            start_provisioning_ap(&mut wifi)?;
            return Ok(WifiStartup::Provisioning(esp_wifi));
        }
        ConnectAttempt::TryStation { ssid, password } => (ssid, password),
    };

    watchdog.lock().unwrap().begin_connecting(&ssid);

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");

    // Association waits are bounded by the driver's connect timeout; a
    // failed or timed-out attempt falls open to provisioning instead of
    // crash-looping on bad credentials.
    match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
        Ok(()) => {
            info!("wifi connected and netif up on `{ssid}`");
            Ok(WifiStartup::Connected(esp_wifi))
        }
        Err(err) => {
            warn!("wifi association failed ({err}); starting provisioning AP");
            let _ = wifi.disconnect();
            let _ = wifi.stop();
            start_provisioning_ap(&mut wifi)?;
            Ok(WifiStartup::Provisioning(esp_wifi))
        }
    }
}

fn start_provisioning_ap(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: PROVISIONING_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        password: PROVISIONING_AP_PASSWORD
            .try_into()
            .map_err(|_| anyhow!("provisioning AP password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!(
        "provisioning AP started on `{}` (password: `{}`)",
        PROVISIONING_AP_SSID, PROVISIONING_AP_PASSWORD
    );
    Ok(())
}

fn run_provisioning_phase(display: &mut Oled, nvs_store: NvsStore, wifi: EspWifi<'static>) -> ! {
    let ssid_row = format!("SSID: {PROVISIONING_AP_SSID}");
    let pass_row = format!("Pass: {PROVISIONING_AP_PASSWORD}");
    if let Err(err) = draw_rows(
        display,
        &[
            "Setup mode active",
            &ssid_row,
            &pass_row,
            "Browse to:",
            PROVISIONING_URL,
            "to configure WiFi",
        ],
    ) {
        warn!("failed to render provisioning screen: {err:#}");
    }

    let server = match create_provisioning_server(nvs_store) {
        Ok(server) => server,
        Err(err) => {
            warn!("provisioning server failed to start: {err:#}");
            fatal_error(
                display,
                "Setup fault!",
                &format!("{err:#}"),
                RUNTIME_FAULT_RESET_DELAY_MS,
            );
        }
    };
    info!("provisioning server listening on http://{PROVISIONING_URL}");

    // The provisioning server owns the device until the post-save restart;
    // only the display stays up.
    let _wifi = wifi;
    let _server = server;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn create_provisioning_server(nvs_store: NvsStore) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf).context("provisioning server bind failed")?;

    server.fn_handler::<anyhow::Error, _>("/config", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(PROVISIONING_FORM_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;

        match parse_credentials_form(&String::from_utf8_lossy(&body)) {
            Ok(credentials) => {
                nvs_store.save_wifi_credentials(&credentials)?;
                info!(
                    "credentials saved for `{}`; restarting into station mode",
                    credentials.ssid
                );
                req.into_response(
                    200,
                    Some("OK"),
                    &[("Content-Type", "text/html; charset=utf-8")],
                )?
                .write_all(PROVISIONING_SAVED_HTML.as_bytes())?;
                schedule_restart(RESTART_GRACE_MS);
            }
            Err(err) => {
                warn!("rejected provisioning submission: {err}");
                req.into_response(
                    400,
                    Some("Bad Request"),
                    &[("Content-Type", "text/html; charset=utf-8")],
                )?
                .write_all(PROVISIONING_REJECTED_HTML.as_bytes())?;
            }
        }
        Ok(())
    })?;

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn schedule_restart(delay_ms: u64) {
    thread::Builder::new()
        .name("restart-request".into())
        .spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            unsafe { esp_idf_svc::sys::esp_restart() };
        })
        .expect("failed to spawn restart thread");
}

fn spawn_link_watchdog(
    watchdog: Arc<Mutex<LinkWatchdog>>,
    mqtt_reset: Arc<AtomicBool>,
    mut wifi_led: PinDriver<'static, AnyOutputPin, Output>,
    initial_events: Vec<LinkEvent>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("link-watchdog".to_string())
        .stack_size(8192)
        .spawn(move || {
            let mut sntp: Option<EspSntp> = None;
            let mut pending = initial_events;

            loop {
                for event in pending.drain(..) {
                    match event {
                        LinkEvent::LinkUp => {
                            if let Err(err) = wifi_led.set_high() {
                                warn!("failed to enable link indicator: {err}");
                            }
                        }
                        LinkEvent::LinkDown => {
                            warn!("wifi link lost");
                            if let Err(err) = wifi_led.set_low() {
                                warn!("failed to disable link indicator: {err}");
                            }
                        }
                        LinkEvent::ResyncClock => {
                            // Dropping the old client stops it; a fresh one
                            // kicks off a new sync immediately.
                            drop(sntp.take());
                            match EspSntp::new_default() {
                                Ok(client) => {
                                    info!("sntp resync started");
                                    sntp = Some(client);
                                }
                                Err(err) => warn!("failed to start sntp resync: {err}"),
                            }
                        }
                        LinkEvent::ReinitChannels => {
                            mqtt_reset.store(true, Ordering::Relaxed);
                        }
                    }
                }

                thread::sleep(Duration::from_millis(LINK_POLL_INTERVAL_MS));

                let link_up = is_wifi_station_connected();
                pending = watchdog
                    .lock()
                    .unwrap()
                    .observe_link(link_up, monotonic_ms());
            }
        })
        .context("failed to spawn link watchdog thread")?;
    Ok(())
}

fn post_ingest(config: &NodeConfig, record: &IngestRecord) -> anyhow::Result<()> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_secs(INGEST_TIMEOUT_SECS)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);

    let body = serde_json::to_vec(record)?;
    let content_length = body.len().to_string();
    let headers = [
        ("Content-Type", "application/json"),
        ("X-API-KEY", config.ingest.key.as_str()),
        ("Content-Length", content_length.as_str()),
    ];

    let mut request = client
        .post(&config.ingest.url, &headers)
        .map_err(|e| anyhow!("{e:?}"))?;
    request.write_all(&body).map_err(|e| anyhow!("{e:?}"))?;
    let response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(anyhow!("ingest endpoint returned HTTP {status}"));
    }
    Ok(())
}

fn publish_broker(
    broker: &mut Option<BrokerSession>,
    config: &NodeConfig,
    snapshot: &SensorSnapshot,
) -> anyhow::Result<()> {
    if broker.is_none() {
        *broker = Some(open_broker_session(config)?);
    }
    let session = broker
        .as_mut()
        .ok_or_else(|| anyhow!("broker session unavailable"))?;

    let payload = broker_payload(snapshot);
    session
        .client
        .publish(
            &config.broker.topic,
            QoS::AtLeastOnce,
            false,
            payload.as_bytes(),
        )
        .context("mqtt publish failed")?;
    Ok(())
}

fn open_broker_session(config: &NodeConfig) -> anyhow::Result<BrokerSession> {
    let url = broker_url(&config.broker.server);
    let mqtt_conf = MqttClientConfiguration {
        client_id: Some("classmon-node"),
        username: Some(config.broker.token.as_str()),
        password: Some(""),
        ..Default::default()
    };

    let (client, mut connection) = EspMqttClient::new(&url, &mqtt_conf)?;

    // The client only works while its connection is polled. The thread ends
    // when the session is dropped for a rebuild.
    thread::Builder::new()
        .name("mqtt-poll".to_string())
        .stack_size(8192)
        .spawn(move || {
            while let Ok(_event) = connection.next() {
                // Publish-only session: nothing subscribes.
            }
            info!("mqtt connection closed");
        })
        .context("failed to spawn mqtt poll thread")?;

    info!("mqtt session established with `{url}`");
    Ok(BrokerSession { client })
}

fn broker_url(server: &str) -> String {
    if server.contains("://") {
        server.to_string()
    } else if server.contains(':') {
        format!("mqtt://{server}")
    } else {
        format!("mqtt://{server}:1883")
    }
}

/// Abandoned-connection signatures: ask for a fresh association instead of
/// retrying blindly into a dead socket.
fn is_abandoned_connection(err: &anyhow::Error) -> bool {
    let message = format!("{err:?}");
    message.contains("ECONNABORTED")
        || message.contains("ECONNRESET")
        || message.contains("ERR_HTTP_CONNECT")
}

fn request_reassociation() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_connect() };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("wifi reassociation request failed: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

impl NvsStore {
    fn load_node_config(&self) -> anyhow::Result<Option<NodeConfig>> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
            Some(value) => Ok(Some(serde_json::from_str::<NodeConfig>(value)?)),
            None => Ok(None),
        }
    }

    fn load_wifi_credentials(&self) -> anyhow::Result<WifiCredentials> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 512];

        match nvs.get_str(NVS_WIFI_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<WifiCredentials>(value)?),
            None => Ok(WifiCredentials::default()),
        }
    }

    fn save_wifi_credentials(&self, credentials: &WifiCredentials) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(credentials)?;
        nvs.set_str(NVS_WIFI_KEY, &payload)?;
        Ok(())
    }
}

/// Compile-time fallback for nodes flashed without a stored configuration.
fn default_node_config() -> NodeConfig {
    match option_env!("CLASSMON_CONFIG") {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
            warn!("invalid CLASSMON_CONFIG json: {err}");
            NodeConfig::default()
        }),
        None => NodeConfig::default(),
    }
}

fn text_style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(BinaryColor::On)
        .build()
}

fn draw_text(display: &mut Oled, text: &str, x: i32, y: i32) -> anyhow::Result<()> {
    Text::with_baseline(text, Point::new(x, y), text_style(), Baseline::Top)
        .draw(display)
        .map_err(|err| anyhow!("display draw failed: {err:?}"))?;
    Ok(())
}

fn draw_rows(display: &mut Oled, rows: &[&str]) -> anyhow::Result<()> {
    display.clear_buffer();
    for (index, row) in rows.iter().enumerate() {
        draw_text(display, row, 0, index as i32 * 10)?;
    }
    display
        .flush()
        .map_err(|err| anyhow!("display flush failed: {err:?}"))
}

fn draw_status(display: &mut Oled, screen: &StatusScreen) -> anyhow::Result<()> {
    display.clear_buffer();
    draw_text(display, &screen.wifi, 0, 0)?;
    draw_text(display, &screen.db, 80, 0)?;
    for (index, row) in screen.rows.iter().enumerate() {
        draw_text(display, row, 0, 10 + index as i32 * 10)?;
    }
    draw_text(display, &screen.timestamp, 0, 60)?;
    display
        .flush()
        .map_err(|err| anyhow!("display flush failed: {err:?}"))
}

/// Unrecoverable condition: report on the display, wait, reset the device.
fn fatal_error(display: &mut Oled, title: &str, detail: &str, delay_ms: u64) -> ! {
    let detail: String = detail.chars().take(20).collect();
    if let Err(err) = draw_rows(display, &[title, &detail]) {
        warn!("failed to render fatal error screen: {err:#}");
    }
    thread::sleep(Duration::from_millis(delay_ms));
    unsafe { esp_idf_svc::sys::esp_restart() };
    unreachable!()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
