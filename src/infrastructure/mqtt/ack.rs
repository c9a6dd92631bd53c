use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::infrastructure::mqtt::LinkError;

pub type AckSender = oneshot::Sender<Result<(), LinkError>>;

/// Pairs acknowledged publishes with their callers.
///
/// Waiters are registered in publish order; the event loop assigns packet
/// ids in the same order, so each outgoing publish adopts the oldest waiter
/// and the matching `PUBACK` releases it.
#[derive(Debug, Default)]
pub struct AckTracker {
    awaiting_id: VecDeque<(u64, AckSender)>,
    in_flight: HashMap<u16, AckSender>,
    next_waiter: u64,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next outgoing publish; returns its id
    pub fn expect_publish(&mut self, waiter: AckSender) -> u64 {
        self.next_waiter += 1;
        self.awaiting_id.push_back((self.next_waiter, waiter));
        self.next_waiter
    }

    /// Withdraw a waiter whose publish never reached the client
    pub fn cancel(&mut self, waiter_id: u64) {
        self.awaiting_id.retain(|(id, _)| *id != waiter_id);
    }

    pub fn on_publish_sent(&mut self, pkid: u16) {
        // QoS 0 publishes carry packet id 0 and are never acknowledged
        if pkid == 0 {
            return;
        }
        if let Some((_, waiter)) = self.awaiting_id.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    pub fn on_puback(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Fail every outstanding waiter
    pub fn fail_all(&mut self, reason: &str) {
        let queued = self.awaiting_id.drain(..).map(|(_, waiter)| waiter);
        for waiter in queued.chain(self.in_flight.drain().map(|(_, waiter)| waiter)) {
            let _ = waiter.send(Err(LinkError(reason.to_string())));
        }
    }

    pub fn outstanding(&self) -> usize {
        self.awaiting_id.len() + self.in_flight.len()
    }
}

pub(crate) fn lock_acks(acks: &Mutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
    acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A registered waiter that is withdrawn on drop unless handed off.
///
/// Dropping happens when the publish failed or its future was cancelled
/// before the client accepted the packet.
pub struct AckRegistration<'a> {
    acks: &'a Mutex<AckTracker>,
    waiter_id: Option<u64>,
}

impl<'a> AckRegistration<'a> {
    pub fn new(acks: &'a Mutex<AckTracker>, waiter: AckSender) -> Self {
        let waiter_id = lock_acks(acks).expect_publish(waiter);
        Self {
            acks,
            waiter_id: Some(waiter_id),
        }
    }

    /// The client accepted the publish; the event loop now owns the waiter
    pub fn handed_off(mut self) {
        self.waiter_id = None;
    }
}

impl Drop for AckRegistration<'_> {
    fn drop(&mut self) {
        if let Some(waiter_id) = self.waiter_id.take() {
            lock_acks(self.acks).cancel(waiter_id);
        }
    }
}
