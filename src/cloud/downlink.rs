//! # MQTT Downlink Subscriber
//!
//! Maintains the subscription that carries cloud-to-gateway commands. The
//! subscriber runs a renegotiation state machine on its own thread: tear
//! down any previous broker connection, connect and subscribe, then poll
//! for publishes. A broker that stays silent past the staleness ceiling,
//! or any connection error, sends the machine back to renegotiation. A
//! failed connect or subscribe waits `RENEGOTIATE_PAUSE` before the next
//! attempt, so an unreachable broker is not hammered in a tight loop.
//! Decoded messages are handed to a [`DownlinkHandler`]; a message that
//! fails to decode is logged and dropped without disturbing the session.

use crate::cloud::proto::{decode_downlink, DownlinkPayload, EnvelopeHeader};
use crate::config::GatewayConfig;
use crate::constants::{
    CONNECTION_KILL_TIMEOUT_SECS, DOWNLINK_STALE_SECS, RECEIVE_POLL_TIMEOUT_SECS,
    SHUTDOWN_KILL_TIMEOUT_SECS, SUBSCRIBE_TIMEOUT_SECS,
};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Disconnect attempts when tearing down a connection.
const KILL_RETRIES: u32 = 5;

/// Pause between disconnect attempts.
const KILL_RETRY_PAUSE: Duration = Duration::from_secs(10);

/// Pause before re-entering renegotiation after a failed connect/subscribe.
const RENEGOTIATE_PAUSE: Duration = Duration::from_secs(5);

/// Receives decoded downlink messages.
pub trait DownlinkHandler: Send + Sync {
    fn handle_downlink(&self, header: &EnvelopeHeader, payload: DownlinkPayload);
}

/// Subscriber state machine. Constructed once and consumed by [`run`].
///
/// [`run`]: DownlinkSubscriber::run
pub struct DownlinkSubscriber {
    config: GatewayConfig,
    handler: Arc<dyn DownlinkHandler>,
    running: Arc<AtomicBool>,
}

impl DownlinkSubscriber {
    pub fn new(
        config: GatewayConfig,
        handler: Arc<dyn DownlinkHandler>,
        running: Arc<AtomicBool>,
    ) -> DownlinkSubscriber {
        DownlinkSubscriber {
            config,
            handler,
            running,
        }
    }

    /// Runs the subscription state machine until the stop flag clears.
    pub fn run(self) {
        let topic = self.config.downlink_topic();
        log::info!("downlink subscriber starting on {topic}");
        let mut session: Option<(Client, Connection)> = None;

        while self.running.load(Ordering::SeqCst) {
            if let Some((client, connection)) = session.take() {
                kill_connection(client, connection, CONNECTION_KILL_TIMEOUT_SECS);
            }
            match self.establish(&topic) {
                Some(established) => session = Some(established),
                None => {
                    thread::sleep(RENEGOTIATE_PAUSE);
                    continue;
                }
            }

            let (_, connection) = session.as_mut().expect("session just established");
            self.receive_loop(connection);
        }

        if let Some((client, connection)) = session.take() {
            kill_connection(client, connection, SHUTDOWN_KILL_TIMEOUT_SECS);
        }
        log::info!("downlink subscriber stopped");
    }

    /// Connects and subscribes, each bounded by the subscribe ceiling.
    /// Returns `None` to send the caller back to renegotiation.
    fn establish(&self, topic: &str) -> Option<(Client, Connection)> {
        let mut options = MqttOptions::new(
            format!("{}-downlink", self.config.gateway_serial),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (
            self.config.broker_username.as_ref(),
            self.config.broker_password.as_ref(),
        ) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut connection) = Client::new(options, 16);
        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce) {
            log::warn!("downlink subscribe request failed: {e}");
            return None;
        }

        // Pump the event loop until the broker confirms the subscription.
        let deadline = Instant::now() + Duration::from_secs(SUBSCRIBE_TIMEOUT_SECS);
        loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) => d,
                None => {
                    log::warn!("downlink subscribe timed out");
                    kill_connection(client, connection, SHUTDOWN_KILL_TIMEOUT_SECS);
                    return None;
                }
            };
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::SubAck(_)))) => {
                    log::info!("downlink subscribed to {topic}");
                    return Some((client, connection));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    log::warn!("downlink connect failed: {e}");
                    return None;
                }
                Err(_) => {
                    log::warn!("downlink subscribe timed out");
                    kill_connection(client, connection, SHUTDOWN_KILL_TIMEOUT_SECS);
                    return None;
                }
            }
        }
    }

    /// Polls for publishes until an error, staleness, or the stop flag.
    /// Any broker traffic counts as liveness, not just publishes.
    fn receive_loop(&self, connection: &mut Connection) {
        let mut last_received = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            match connection.recv_timeout(Duration::from_secs(RECEIVE_POLL_TIMEOUT_SECS)) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    last_received = Instant::now();
                    self.dispatch(&publish.payload);
                }
                Ok(Ok(_)) => {
                    last_received = Instant::now();
                }
                Ok(Err(e)) => {
                    log::warn!("downlink connection error: {e}");
                    return;
                }
                Err(_) => {
                    if last_received.elapsed().as_secs() >= DOWNLINK_STALE_SECS {
                        log::warn!(
                            "no downlink traffic for {}s, renegotiating",
                            last_received.elapsed().as_secs()
                        );
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(&self, body: &[u8]) {
        match decode_downlink(body) {
            Ok((header, payload)) => {
                log::debug!(
                    "downlink from {} originator {}",
                    header.hardware_id,
                    header.originator
                );
                self.handler.handle_downlink(&header, payload);
            }
            Err(e) => log::warn!("dropping undecodable downlink: {e}"),
        }
    }
}

/// Tears down a broker session, bounded by `timeout_secs`. The disconnect
/// request is retried a few times, then the event loop is drained until the
/// broker closes the stream or the ceiling passes.
fn kill_connection(client: Client, mut connection: Connection, timeout_secs: u64) {
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    for attempt in 1..=KILL_RETRIES {
        match client.disconnect() {
            Ok(()) => break,
            Err(e) => {
                log::debug!("disconnect attempt {attempt} failed: {e}");
                if attempt == KILL_RETRIES || Instant::now() >= deadline {
                    return;
                }
                thread::sleep(KILL_RETRY_PAUSE.min(deadline.saturating_duration_since(Instant::now())));
            }
        }
    }
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match connection.recv_timeout(remaining.min(Duration::from_secs(1))) {
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return,
            Err(_) => {
                if Instant::now() >= deadline {
                    return;
                }
            }
        }
    }
}
