pub mod alerts;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod cycle;
pub mod dispatch;
pub mod display;
pub mod provisioning;
pub mod sensors;
pub mod types;

pub use alerts::{AlertAction, AlertEngine};
pub use config::{BrokerConfig, ConfigError, IngestConfig, NodeConfig, WifiCredentials};
pub use connectivity::{connect_decision, ConnectAttempt, LinkEvent, LinkWatchdog};
pub use cycle::{cycle_delay_ms, CycleOutcome};
pub use dispatch::{broker_payload, ingest_record, Channel, DispatchTimers, IngestRecord};
pub use display::StatusScreen;
pub use provisioning::{parse_credentials_form, FormError};
pub use sensors::{build_snapshot, scale_to_percent, ClimateReading, RawSample};
pub use types::{ConnectivityState, SensorSnapshot};
