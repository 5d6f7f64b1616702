//! # Outbound Command Encoder & Pending Queue
//!
//! Public command builders assemble complete on-wire frames and enqueue them
//! onto a bounded FIFO. Frames sit in the queue until the bus master polls
//! this device, which is the only transmission opportunity on the shared bus.
//!
//! Enqueue blocks up to five seconds for queue space; on timeout the command
//! is dropped and reported as `QueueFull` so a stalled bus can never deadlock
//! a producer.
//!
//! The filter-cycle request is special: the controller only accepts a full
//! filter-cycle-info block replacement, never a delta, so the request is
//! parked and merged onto the controller's next reported raw block. The park
//! slot is consumed with a locked `take()`, so two concurrent consumers
//! produce exactly one frame.

use crate::constants::{
    CONTROL_DEVICE, PENDING_ENQUEUE_TIMEOUT_SECS, PENDING_QUEUE_CAPACITY, TARGET_TEMP_MAX_F,
    TARGET_TEMP_MIN_F,
};
use crate::dialect::{DialectKind, SpaDialect};
use crate::error::SpaError;
use crate::rs485::arbitration::BusAddress;
use crate::rs485::frame::pack_frame;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Panel-request byte-0 selector bits.
pub const REQ_DEVICE_CONFIG: u8 = 0x01;
pub const REQ_FILTER_CYCLES: u8 = 0x02;
pub const REQ_SYSTEM_INFO: u8 = 0x04;
pub const REQ_SETUP_PARAMS: u8 = 0x08;
pub const REQ_FAULT_LOG: u8 = 0x20;

/// Fault-log entry selector meaning "most recent".
pub const FAULT_ENTRY_LATEST: u8 = 0xFF;

/// A frame waiting for the next bus poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub frame: Vec<u8>,
    /// Correlates a downlink request with its eventual acknowledgment.
    pub originator: Option<String>,
    pub hardware_id: Option<String>,
}

/// A deferred filter-cycle schedule change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCycleRequest {
    /// Which schedule slot to replace: 1 or 2.
    pub cycle: u8,
    pub enabled: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub duration_hours: u8,
    pub duration_minutes: u8,
    pub originator: Option<String>,
}

/// Bounded FIFO guarded by a condition variable with a deadline on enqueue.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    space: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> BoundedQueue<T> {
        BoundedQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues, waiting up to `timeout` for space. Returns false on timeout.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        while queue.len() >= self.capacity {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return false,
            };
            let (guard, result) = self
                .space
                .wait_timeout(queue, remaining)
                .expect("queue lock poisoned");
            queue = guard;
            if result.timed_out() && queue.len() >= self.capacity {
                return false;
            }
        }
        queue.push_back(item);
        true
    }

    /// Removes the head without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        let item = queue.pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds command frames and owns the pending queue.
pub struct CommandEncoder {
    dialect: Box<dyn SpaDialect>,
    queue: BoundedQueue<PendingCommand>,
    pending_filter: Mutex<Option<FilterCycleRequest>>,
    address: Arc<BusAddress>,
    hardware_id: String,
}

impl CommandEncoder {
    pub fn new(kind: DialectKind, address: Arc<BusAddress>, hardware_id: &str) -> CommandEncoder {
        CommandEncoder {
            dialect: kind.decoder(),
            queue: BoundedQueue::new(PENDING_QUEUE_CAPACITY),
            pending_filter: Mutex::new(None),
            address,
            hardware_id: hardware_id.to_string(),
        }
    }

    /// Head of the pending queue, consumed by the session loop on a bus poll.
    pub fn dequeue_for_poll(&self) -> Option<PendingCommand> {
        self.queue.try_pop()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&self, packet_type: u8, payload: &[u8], originator: Option<String>) -> Result<(), SpaError> {
        let frame = pack_frame(self.address.get(), CONTROL_DEVICE, packet_type, payload);
        let command = PendingCommand {
            frame,
            originator,
            hardware_id: Some(self.hardware_id.clone()),
        };
        if self
            .queue
            .push_timeout(command, Duration::from_secs(PENDING_ENQUEUE_TIMEOUT_SECS))
        {
            Ok(())
        } else {
            Err(SpaError::QueueFull { queue: "pending command" })
        }
    }

    /// Requests a new target water temperature. `temp` is Fahrenheit;
    /// the payload carries device-native units. Temperatures outside the
    /// range any controller accepts are rejected before encoding, since an
    /// out-of-range value would wrap into a different valid temperature.
    pub fn set_temperature(
        &self,
        temp: i32,
        celsius: bool,
        originator: Option<String>,
    ) -> Result<(), SpaError> {
        if !(TARGET_TEMP_MIN_F..=TARGET_TEMP_MAX_F).contains(&temp) {
            return Err(SpaError::TemperatureOutOfRange {
                requested: temp,
                min: TARGET_TEMP_MIN_F,
                max: TARGET_TEMP_MAX_F,
            });
        }
        let raw = if celsius {
            (((temp - 32) * 10) / 9) as u8
        } else {
            temp as u8
        };
        self.enqueue(self.dialect.command_codes().set_temperature, &[raw], originator)
    }

    /// Sends a panel button code (the generic toggle mechanism).
    pub fn send_button_code(&self, code: u8, originator: Option<String>) -> Result<(), SpaError> {
        self.enqueue(self.dialect.command_codes().button_code, &[code, 0x00], originator)
    }

    /// Sets a light to the given intensity level.
    pub fn send_light_command(
        &self,
        light: u8,
        intensity: u8,
        originator: Option<String>,
    ) -> Result<(), SpaError> {
        self.enqueue(
            self.dialect.command_codes().light_command,
            &[light, intensity],
            originator,
        )
    }

    /// Sets the controller clock.
    pub fn update_spa_time(
        &self,
        hour: u8,
        minute: u8,
        military: bool,
        originator: Option<String>,
    ) -> Result<(), SpaError> {
        let hour_byte = if military { hour | 0x80 } else { hour };
        self.enqueue(
            self.dialect.command_codes().set_time,
            &[hour_byte, minute],
            originator,
        )
    }

    /// Asks the controller to broadcast the selected configuration frames.
    /// `fault_entry` selects a specific fault-log entry when the fault-log
    /// bit is set.
    pub fn send_panel_request(
        &self,
        request_bits: u8,
        fault_entry: Option<u8>,
    ) -> Result<(), SpaError> {
        self.enqueue(
            self.dialect.command_codes().panel_request,
            &[request_bits, fault_entry.unwrap_or(0), 0x00],
            None,
        )
    }

    /// Parks a filter-cycle schedule change until the controller next
    /// reports its current filter-cycle-info block.
    pub fn send_filter_cycle_request(&self, request: FilterCycleRequest) -> Result<(), SpaError> {
        if request.cycle != 1 && request.cycle != 2 {
            return Err(SpaError::Other(format!(
                "invalid filter cycle {}",
                request.cycle
            )));
        }
        let mut pending = self.pending_filter.lock().expect("filter lock poisoned");
        if pending.is_some() {
            log::warn!("replacing an unconsumed filter cycle request");
        }
        *pending = Some(request);
        Ok(())
    }

    /// Consumes the parked request, if any, merging it onto `raw_block` (the
    /// controller's just-reported filter-cycle-info payload) and enqueueing
    /// the full replacement frame. At most one frame results no matter how
    /// many concurrent callers race here; the slot is cleared atomically
    /// under its lock.
    pub fn send_filter_cycle_request_if_pending(&self, raw_block: &[u8]) -> Result<(), SpaError> {
        let request = {
            let mut pending = self.pending_filter.lock().expect("filter lock poisoned");
            pending.take()
        };
        let Some(request) = request else {
            return Ok(());
        };
        let block = self.dialect.merge_filter_request(raw_block, &request);
        self.enqueue(
            self.dialect.command_codes().filter_cycle_set,
            &block,
            request.originator,
        )
    }

    /// True if a filter-cycle change is parked awaiting merge.
    pub fn has_pending_filter_request(&self) -> bool {
        self.pending_filter
            .lock()
            .expect("filter lock poisoned")
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rs485::frame::{is_valid, parse_frame};

    fn encoder() -> CommandEncoder {
        let address = Arc::new(BusAddress::new());
        address.set(0x10);
        CommandEncoder::new(DialectKind::Ngsc, address, "GW-TEST")
    }

    #[test]
    fn test_set_temperature_builds_valid_frame() {
        let enc = encoder();
        enc.set_temperature(102, false, None).unwrap();
        let command = enc.dequeue_for_poll().unwrap();
        assert!(is_valid(&command.frame));
        let (_, frame) = parse_frame(&command.frame).unwrap();
        assert_eq!(frame.address, 0x10);
        assert_eq!(frame.packet_type, crate::dialect::ngsc::CMD_SET_TEMPERATURE);
        assert_eq!(frame.payload, vec![102]);
    }

    #[test]
    fn test_set_temperature_rejects_out_of_range() {
        let enc = encoder();
        // 300 F would wrap through the byte cast into a 44 F command.
        assert!(matches!(
            enc.set_temperature(300, false, None),
            Err(SpaError::TemperatureOutOfRange { requested: 300, .. })
        ));
        // Below 32 F the Celsius conversion goes negative and wraps large.
        assert!(matches!(
            enc.set_temperature(0, true, None),
            Err(SpaError::TemperatureOutOfRange { requested: 0, .. })
        ));
        assert_eq!(enc.pending_len(), 0);

        // The range bounds themselves still encode.
        enc.set_temperature(TARGET_TEMP_MAX_F, false, None).unwrap();
        enc.set_temperature(TARGET_TEMP_MIN_F, true, None).unwrap();
        assert_eq!(enc.pending_len(), 2);
    }

    #[test]
    fn test_queue_full_reported() {
        let address = Arc::new(BusAddress::new());
        let enc = CommandEncoder {
            dialect: DialectKind::Ngsc.decoder(),
            queue: BoundedQueue::new(2),
            pending_filter: Mutex::new(None),
            address,
            hardware_id: "GW-TEST".into(),
        };
        enc.send_button_code(0x04, None).unwrap();
        enc.send_button_code(0x04, None).unwrap();
        // Third enqueue cannot find space; use a tiny wait by draining after.
        let result = {
            let queue_full = !enc.queue.push_timeout(
                PendingCommand {
                    frame: vec![],
                    originator: None,
                    hardware_id: None,
                },
                Duration::from_millis(50),
            );
            queue_full
        };
        assert!(result);
    }

    #[test]
    fn test_filter_request_consumed_once() {
        let enc = encoder();
        enc.send_filter_cycle_request(FilterCycleRequest {
            cycle: 1,
            enabled: true,
            start_hour: 6,
            start_minute: 30,
            duration_hours: 2,
            duration_minutes: 0,
            originator: Some("abc".into()),
        })
        .unwrap();

        let raw = [8u8, 0, 1, 0, 0x80 | 20, 0, 1, 0];
        enc.send_filter_cycle_request_if_pending(&raw).unwrap();
        enc.send_filter_cycle_request_if_pending(&raw).unwrap();

        // Exactly one frame enqueued; the merged block keeps cycle 2 intact.
        let command = enc.dequeue_for_poll().expect("one frame");
        assert!(enc.dequeue_for_poll().is_none());
        let (_, frame) = parse_frame(&command.frame).unwrap();
        assert_eq!(frame.payload[0], 6);
        assert_eq!(frame.payload[1], 30);
        assert_eq!(frame.payload[4], 0x80 | 20);
        assert_eq!(command.originator.as_deref(), Some("abc"));
    }

    #[test]
    fn test_panel_request_payload() {
        let enc = encoder();
        enc.send_panel_request(REQ_FAULT_LOG, Some(9)).unwrap();
        let command = enc.dequeue_for_poll().unwrap();
        let (_, frame) = parse_frame(&command.frame).unwrap();
        assert_eq!(frame.payload, vec![REQ_FAULT_LOG, 9, 0x00]);
    }
}
