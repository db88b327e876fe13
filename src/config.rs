use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub heartbeat_secs: u64,
    pub cooldown_secs: u64,

    pub spool_path: PathBuf,
    pub database_path: PathBuf,
    pub db_pool_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mqtt_url = env_string("PPM_MQTT_URL", Some("mqtt://127.0.0.1:1883".to_string()))?;
        let url = Url::parse(&mqtt_url).context("invalid PPM_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("PPM_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);

        let mqtt_username = env_optional("PPM_MQTT_USERNAME");
        let mqtt_password = env_optional("PPM_MQTT_PASSWORD");
        let mqtt_topic = env_string("PPM_MQTT_TOPIC", Some("RTPPM_ALL".to_string()))?;
        let mqtt_client_id = match env_optional("PPM_MQTT_CLIENT_ID") {
            Some(id) => id,
            None => default_client_id(mqtt_username.as_deref()),
        };

        let heartbeat_secs = env_u64("PPM_MQTT_KEEPALIVE_SECS", Some(15))?;
        let cooldown_secs = env_u64("PPM_DISCONNECT_COOLDOWN_SECS", Some(15))?;

        let spool_path = PathBuf::from(env_string(
            "PPM_SPOOL_PATH",
            Some("ppm-events.csv".to_string()),
        )?);
        let database_path = PathBuf::from(env_string(
            "PPM_DATABASE_PATH",
            Some("punctuality.db".to_string()),
        )?);
        let db_pool_size = env_u64("PPM_DB_POOL_SIZE", Some(5))? as u32;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic,
            mqtt_client_id,
            heartbeat_secs,
            cooldown_secs,
            spool_path,
            database_path,
            db_pool_size,
        })
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

// A stable host id keeps the broker-side subscription identity consistent
// across restarts.
fn default_client_id(username: Option<&str>) -> String {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    match username {
        Some(username) => format!("{username}-{host}"),
        None => format!("punctuality-sidecar-{host}"),
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
