//! # MQTT Uplink Dispatcher
//!
//! Publishes serialized state/event/registration messages to the cloud with
//! at-least-once delivery. A publish waits up to ten seconds for broker
//! acknowledgment; failed publishes are cached in a bounded retry queue and
//! resent opportunistically after the next success, capped at five attempts
//! per message. The broker connection is torn down and rebuilt at most once
//! per sixty seconds, so a flapping broker self-heals without a reconnect
//! storm.

use crate::cloud::proto::{encode_uplink, EnvelopeHeader, UplinkCommandType};
use crate::constants::{
    MAX_PUBLISH_ATTEMPTS, PUBLISH_ACK_TIMEOUT_SECS, RECONNECT_MIN_INTERVAL_SECS,
    RETRY_QUEUE_CAPACITY,
};
use crate::config::GatewayConfig;
use crate::error::SpaError;
use chrono::Utc;
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One uplink queued for publication (and possibly retry).
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedUplink {
    pub hardware_id: String,
    pub originator: String,
    pub command: UplinkCommandType,
    /// Encoded typed payload; the dispatcher adds the envelope segments.
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub cached: bool,
}

impl QueuedUplink {
    pub fn new(
        hardware_id: &str,
        originator: &str,
        command: UplinkCommandType,
        payload: Vec<u8>,
    ) -> QueuedUplink {
        QueuedUplink {
            hardware_id: hardware_id.to_string(),
            originator: originator.to_string(),
            command,
            payload,
            attempts: 0,
            cached: false,
        }
    }

    /// Retry-queue identity: same message regardless of attempt count.
    fn same_message(&self, other: &QueuedUplink) -> bool {
        self.command == other.command
            && self.originator == other.originator
            && self.payload == other.payload
    }
}

/// Tracks one publish through the event stream. The event loop assigns the
/// packet id when it sends our publish; only the acknowledgment carrying
/// that id confirms delivery. A stray ack for an earlier in-flight message
/// carries a different id and is ignored.
fn publish_acknowledged(event: &Event, published_pkid: &mut Option<u16>) -> bool {
    match event {
        Event::Outgoing(Outgoing::Publish(pkid)) => {
            *published_pkid = Some(*pkid);
            false
        }
        Event::Incoming(Packet::PubAck(ack)) => *published_pkid == Some(ack.pkid),
        _ => false,
    }
}

/// Publishes uplinks, owning the broker connection and the retry queue.
pub struct UplinkDispatcher {
    config: GatewayConfig,
    topic: String,
    connection: Option<(Client, Connection)>,
    retry_queue: Mutex<VecDeque<QueuedUplink>>,
    last_reconnect: Option<Instant>,
}

impl UplinkDispatcher {
    pub fn new(config: GatewayConfig) -> UplinkDispatcher {
        let topic = config.uplink_topic();
        UplinkDispatcher {
            config,
            topic,
            connection: None,
            retry_queue: Mutex::new(VecDeque::new()),
            last_reconnect: None,
        }
    }

    /// Serializes and publishes one uplink. On failure the message is cached
    /// for retry when `retry_on_failure` is set; on success the retry queue
    /// is drained opportunistically.
    pub fn publish(&mut self, mut uplink: QueuedUplink, retry_on_failure: bool) {
        match self.publish_once(&uplink) {
            Ok(()) => {
                if uplink.cached {
                    self.remove_cached(&uplink);
                    log::info!(
                        "recovered cached uplink {:?} after {} attempts",
                        uplink.command,
                        uplink.attempts
                    );
                } else {
                    self.drain_retry_queue();
                }
            }
            Err(e) => {
                log::warn!("uplink publish failed: {e}");
                self.maybe_reconnect();
                if retry_on_failure {
                    self.cache_for_retry(&mut uplink);
                }
            }
        }
    }

    /// One publish attempt: connect if needed, publish QoS 1, wait for the
    /// broker's acknowledgment.
    fn publish_once(&mut self, uplink: &QueuedUplink) -> Result<(), SpaError> {
        let body = encode_uplink(
            &EnvelopeHeader {
                hardware_id: uplink.hardware_id.clone(),
                originator: uplink.originator.clone(),
                sent_at_ms: Utc::now().timestamp_millis() as u64,
            },
            uplink.command,
            &uplink.payload,
        );

        let topic = self.topic.clone();
        let (client, connection) = self.ensure_connected()?;
        client.publish(&topic, QoS::AtLeastOnce, false, body)?;

        let deadline = Instant::now() + Duration::from_secs(PUBLISH_ACK_TIMEOUT_SECS);
        let mut published_pkid = None;
        let result = loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break Err(SpaError::PublishTimeout(PUBLISH_ACK_TIMEOUT_SECS));
            };
            match connection.recv_timeout(remaining) {
                Ok(Ok(event)) if publish_acknowledged(&event, &mut published_pkid) => {
                    break Ok(())
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => break Err(SpaError::MqttError(e.to_string())),
                Err(_) => break Err(SpaError::PublishTimeout(PUBLISH_ACK_TIMEOUT_SECS)),
            }
        };
        if matches!(result, Err(SpaError::MqttError(_))) {
            // The event loop reported a broken session; force a rebuild.
            self.connection = None;
        }
        result
    }

    fn ensure_connected(&mut self) -> Result<&mut (Client, Connection), SpaError> {
        if self.connection.is_none() {
            let mut options = MqttOptions::new(
                format!("{}-uplink", self.config.gateway_serial),
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
            self.connection = Some(Client::new(options, 16));
            self.last_reconnect = Some(Instant::now());
            log::info!(
                "uplink connecting to {}:{}",
                self.config.broker_host,
                self.config.broker_port
            );
        }
        Ok(self.connection.as_mut().expect("connection just created"))
    }

    /// Tears the connection down for rebuild, at most once per minute.
    fn maybe_reconnect(&mut self) {
        let due = match self.last_reconnect {
            Some(at) => at.elapsed().as_secs() > RECONNECT_MIN_INTERVAL_SECS,
            None => true,
        };
        if due {
            log::info!("recycling uplink broker connection");
            if let Some((client, _)) = self.connection.take() {
                let _ = client.disconnect();
            }
            self.last_reconnect = Some(Instant::now());
        }
    }

    /// Caches a failed uplink exactly once, bumping its attempt counter.
    /// The cached flag is re-checked under the queue lock so concurrent
    /// senders cannot double-insert the same message.
    fn cache_for_retry(&self, uplink: &mut QueuedUplink) {
        let mut queue = self.retry_queue.lock().expect("retry queue lock poisoned");
        uplink.attempts += 1;
        if uplink.attempts > MAX_PUBLISH_ATTEMPTS {
            log::warn!(
                "dropping uplink {:?} after {} attempts",
                uplink.command,
                uplink.attempts
            );
            queue.retain(|queued| !queued.same_message(uplink));
            return;
        }
        if let Some(existing) = queue.iter_mut().find(|queued| queued.same_message(uplink)) {
            existing.attempts = uplink.attempts;
            return;
        }
        if uplink.cached {
            // Already marked by another sender between our failure and this
            // lock; nothing to insert.
            return;
        }
        if queue.len() >= RETRY_QUEUE_CAPACITY {
            log::warn!("uplink retry queue full, dropping {:?}", uplink.command);
            return;
        }
        uplink.cached = true;
        queue.push_back(uplink.clone());
    }

    fn remove_cached(&self, uplink: &QueuedUplink) {
        let mut queue = self.retry_queue.lock().expect("retry queue lock poisoned");
        queue.retain(|queued| !queued.same_message(uplink));
    }

    /// Attempts to resend every cached message. Entries that keep failing
    /// accumulate attempts and are dropped past the cap.
    fn drain_retry_queue(&mut self) {
        let cached: Vec<QueuedUplink> = {
            let queue = self.retry_queue.lock().expect("retry queue lock poisoned");
            if queue.is_empty() {
                return;
            }
            queue.iter().cloned().collect()
        };
        log::info!("draining {} cached uplinks", cached.len());
        for mut uplink in cached {
            match self.publish_once(&uplink) {
                Ok(()) => {
                    self.remove_cached(&uplink);
                    log::info!(
                        "recovered cached uplink {:?} after {} attempts",
                        uplink.command,
                        uplink.attempts
                    );
                }
                Err(e) => {
                    log::debug!("cached uplink resend failed: {e}");
                    self.cache_for_retry(&mut uplink);
                }
            }
        }
    }

    /// Number of uplinks currently cached for retry.
    pub fn retry_len(&self) -> usize {
        self.retry_queue.lock().expect("retry queue lock poisoned").len()
    }

    /// Closes the broker connection, best effort.
    pub fn shutdown(&mut self) {
        if let Some((client, _)) = self.connection.take() {
            let _ = client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> UplinkDispatcher {
        let props = crate::config::parse_properties(
            "serial.port=/dev/null\n\
             gateway.serial=GW-T\n\
             mqtt.host=localhost\n\
             spa.dialect=ngsc\n",
        );
        UplinkDispatcher::new(GatewayConfig::from_properties(&props).unwrap())
    }

    fn uplink() -> QueuedUplink {
        QueuedUplink::new("GW-T", "orig-1", UplinkCommandType::SpaState, vec![1, 2, 3])
    }

    #[test]
    fn test_cache_once_then_attempts_accumulate() {
        let d = dispatcher();
        let mut u = uplink();
        d.cache_for_retry(&mut u);
        assert!(u.cached);
        assert_eq!(d.retry_len(), 1);

        // Subsequent failures update the attempt count, not the queue size.
        d.cache_for_retry(&mut u);
        d.cache_for_retry(&mut u);
        assert_eq!(d.retry_len(), 1);
        assert_eq!(u.attempts, 3);
    }

    #[test]
    fn test_retry_cap_drops_message() {
        let d = dispatcher();
        let mut u = uplink();
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            d.cache_for_retry(&mut u);
        }
        assert_eq!(d.retry_len(), 1);
        // Sixth failure exceeds the cap and removes the cached entry.
        d.cache_for_retry(&mut u);
        assert_eq!(d.retry_len(), 0);
    }

    #[test]
    fn test_retry_queue_bounded() {
        let d = dispatcher();
        for i in 0..(RETRY_QUEUE_CAPACITY + 10) {
            let mut u = QueuedUplink::new(
                "GW-T",
                &format!("orig-{i}"),
                UplinkCommandType::SpaState,
                vec![i as u8],
            );
            d.cache_for_retry(&mut u);
        }
        assert_eq!(d.retry_len(), RETRY_QUEUE_CAPACITY);
    }

    #[test]
    fn test_ack_must_match_published_packet_id() {
        use rumqttc::mqttbytes::v4::PubAck;

        let mut pkid = None;
        // A leftover ack from an earlier message arrives before our publish
        // goes out; it must not confirm anything.
        assert!(!publish_acknowledged(
            &Event::Incoming(Packet::PubAck(PubAck { pkid: 7 })),
            &mut pkid
        ));

        // The event loop sends our publish as packet 2.
        assert!(!publish_acknowledged(
            &Event::Outgoing(Outgoing::Publish(2)),
            &mut pkid
        ));
        assert_eq!(pkid, Some(2));

        // An ack for a different packet keeps us waiting.
        assert!(!publish_acknowledged(
            &Event::Incoming(Packet::PubAck(PubAck { pkid: 1 })),
            &mut pkid
        ));
        // Only the matching ack confirms.
        assert!(publish_acknowledged(
            &Event::Incoming(Packet::PubAck(PubAck { pkid: 2 })),
            &mut pkid
        ));
    }

    #[test]
    fn test_remove_cached_matches_message_identity() {
        let d = dispatcher();
        let mut u = uplink();
        d.cache_for_retry(&mut u);
        d.remove_cached(&u);
        assert_eq!(d.retry_len(), 0);
    }
}
