use crate::config::Config;
use crate::error::PipelineError;
use crate::parser;
use crate::spool::Spool;
use rumqttc::{AsyncClient, ConnectionError, Event, Incoming, MqttOptions, QoS, StateError};
use tokio::time::sleep;

/// Long-lived feed subscriber: connect, authenticate, subscribe, then spool
/// every inbound snapshot until the session dies.
///
/// There is no in-process reconnect. A lost session (transport error,
/// broker disconnect, heartbeat timeout) waits the configured cooldown and
/// returns the classified error so the process exits and the external
/// supervisor restarts it. Failures before the first CONNACK are fatal
/// immediately.
pub async fn run_subscriber(config: &Config, spool: Spool) -> Result<(), PipelineError> {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.heartbeat());
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }

    let (client, mut eventloop) = AsyncClient::new(options, 32);
    // QoS 0: the broker does not wait for client acks. Duplicate or lost
    // frames are tolerated downstream by the per-day dedup rule.
    client
        .subscribe(&config.mqtt_topic, QoS::AtMostOnce)
        .await
        .map_err(|err| PipelineError::Transport(err.to_string()))?;
    tracing::info!(
        host = %config.mqtt_host,
        port = config.mqtt_port,
        topic = %config.mqtt_topic,
        "connecting to feed broker"
    );

    let mut session_up = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                session_up = true;
                tracing::info!(client_id = %config.mqtt_client_id, "connected and subscribed to feed");
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                handle_publish(&spool, &publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Incoming::PingResp)) => {
                tracing::debug!("heartbeat from broker");
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                let err = PipelineError::Disconnected("broker closed the session".to_string());
                return fatal_after_cooldown(err, config).await;
            }
            Ok(_) => {}
            Err(err) => {
                let classified = classify(&err);
                if !session_up {
                    tracing::error!(error = %err, "failed to establish broker session");
                    return Err(classified);
                }
                return fatal_after_cooldown(classified, config).await;
            }
        }
    }
}

fn handle_publish(spool: &Spool, topic: &str, payload: &[u8]) {
    match parser::parse_feed_message(payload) {
        Ok(events) => {
            let count = events.len();
            for event in &events {
                tracing::debug!(
                    operator = %event.operator_name,
                    ppm = event.ppm,
                    date = %event.record_date,
                    time = %event.record_time,
                    "spooling punctuality record"
                );
                if let Err(err) = spool.append(event) {
                    tracing::error!(
                        error = %err,
                        operator = %event.operator_name,
                        "failed to spool record"
                    );
                }
            }
            tracing::info!(count, topic = %topic, "feed message parsed and spooled");
        }
        Err(err) => {
            tracing::warn!(error = %err, topic = %topic, "skipping malformed feed message");
        }
    }
}

async fn fatal_after_cooldown(err: PipelineError, config: &Config) -> Result<(), PipelineError> {
    tracing::warn!(
        error = %err,
        cooldown_secs = config.cooldown_secs,
        "broker session lost; waiting before exiting"
    );
    sleep(config.cooldown()).await;
    tracing::warn!("exiting; the process supervisor owns the restart");
    Err(err)
}

fn classify(err: &ConnectionError) -> PipelineError {
    match err {
        ConnectionError::MqttState(StateError::AwaitPingResp) => {
            PipelineError::HeartbeatTimeout(err.to_string())
        }
        _ => PipelineError::Transport(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_ping_acks_classify_as_heartbeat_timeout() {
        let err = ConnectionError::MqttState(StateError::AwaitPingResp);
        assert!(matches!(classify(&err), PipelineError::HeartbeatTimeout(_)));
    }

    #[test]
    fn io_failures_classify_as_transport() {
        let err = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(classify(&err), PipelineError::Transport(_)));
    }
}
