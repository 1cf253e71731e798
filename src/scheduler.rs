//! Microsecond event scheduler
//!
//! A fixed table of cancellable, reschedulable one-shot alarms. This is the
//! only way virtual devices model time: timer IRQs, DMA pacing and every
//! other periodic behaviour is an [`EventKey`] armed here.
//!
//! Firing is split in two halves:
//! - [`EventScheduler::advance`] is the interrupt side. It moves expired
//!   alarms into a bounded fired queue, tagged with their alarm id.
//! - [`EventScheduler::next_fired`] / [`EventScheduler::complete`] are the
//!   handler side. The owner of the scheduler matches the key to a handler
//!   and hands the handler's return value back.
//!
//! A fired message whose alarm id no longer matches the event (it was removed
//! or re-armed in between) is dropped without running the handler.
//!
//! A non-zero handler return `n` re-arms the event `n` microseconds after the
//! time it was *due*, not after the time the handler ran, so periodic devices
//! never accumulate drift.

use crate::{Gf1Error, Result};

/// Number of events the scheduler can hold at once
pub const SCHEDULER_CAPACITY: usize = 16;

/// Identifier of one armed alarm. Never zero.
pub type AlarmId = u32;

/// Identifies an event: which peripheral owns it and which of its handlers runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Owning peripheral
    pub owner: u8,
    /// Handler selector, private to the owner
    pub kind: u16,
}

impl EventKey {
    /// Build a key
    pub const fn new(owner: u8, kind: u16) -> Self {
        Self { owner, kind }
    }
}

/// An alarm that expired and is waiting for its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    /// Event that fired
    pub key: EventKey,
    /// Opaque value passed when the event was armed
    pub value: u32,
    /// Alarm that produced this fire
    pub alarm: AlarmId,
    /// Time the alarm was due (not the time it was noticed)
    pub due_us: u64,
}

#[derive(Debug, Clone, Copy)]
struct TimerEvent {
    key: EventKey,
    value: u32,
    pending_alarm: AlarmId,
    /// `None` once the alarm has been posted to the fired queue
    armed_due: Option<u64>,
    due_us: u64,
}

/// Bounded FIFO of fired alarms. Each event has at most one live alarm, so
/// once stale fires are compacted out the table capacity bounds the queue.
#[derive(Debug, Clone)]
struct FiredQueue {
    entries: [Option<Fired>; SCHEDULER_CAPACITY],
    head: usize,
    len: usize,
}

impl FiredQueue {
    fn new() -> Self {
        Self {
            entries: [None; SCHEDULER_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == SCHEDULER_CAPACITY
    }

    fn push(&mut self, fired: Fired) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.len) % SCHEDULER_CAPACITY;
        self.entries[tail] = Some(fired);
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<Fired> {
        if self.len == 0 {
            return None;
        }
        let fired = self.entries[self.head].take();
        self.head = (self.head + 1) % SCHEDULER_CAPACITY;
        self.len -= 1;
        fired
    }

    fn clear(&mut self) {
        self.entries = [None; SCHEDULER_CAPACITY];
        self.head = 0;
        self.len = 0;
    }
}

/// Fixed-capacity table of microsecond timer events
#[derive(Debug, Clone)]
pub struct EventScheduler {
    slots: [Option<TimerEvent>; SCHEDULER_CAPACITY],
    fired: FiredQueue,
    next_alarm: AlarmId,
    now_us: u64,
}

impl EventScheduler {
    /// Create an empty scheduler at time zero
    pub fn new() -> Self {
        Self {
            slots: [None; SCHEDULER_CAPACITY],
            fired: FiredQueue::new(),
            next_alarm: 1,
            now_us: 0,
        }
    }

    /// Current scheduler time in microseconds
    pub fn now(&self) -> u64 {
        self.now_us
    }

    fn allocate_alarm(&mut self) -> AlarmId {
        let id = self.next_alarm;
        self.next_alarm = self.next_alarm.wrapping_add(1).max(1);
        id
    }

    fn slot_of(&self, key: EventKey) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_some_and(|event| event.key == key))
    }

    /// Arm `key` to fire `delay_us` microseconds from now with `value`.
    ///
    /// An event that is already armed is cancelled and re-armed.
    /// Fails with [`Gf1Error::SchedulerFull`] when no slot is free.
    pub fn add(&mut self, key: EventKey, delay_us: u32, value: u32) -> Result<AlarmId> {
        let index = match self.slot_of(key) {
            Some(index) => index,
            None => match self.slots.iter().position(Option::is_none) {
                Some(index) => index,
                None => {
                    log::warn!("scheduler full, dropping event {key:?}");
                    return Err(Gf1Error::SchedulerFull {
                        capacity: SCHEDULER_CAPACITY,
                    });
                }
            },
        };

        let alarm = self.allocate_alarm();
        let due_us = self.now_us + delay_us as u64;
        self.slots[index] = Some(TimerEvent {
            key,
            value,
            pending_alarm: alarm,
            armed_due: Some(due_us),
            due_us,
        });
        Ok(alarm)
    }

    /// Cancel `key` if it is armed. Removing an inactive event is a no-op.
    pub fn remove(&mut self, key: EventKey) {
        if let Some(index) = self.slot_of(key) {
            self.slots[index] = None;
        }
    }

    /// Cancel every event owned by `owner`
    pub fn remove_owner(&mut self, owner: u8) {
        for slot in &mut self.slots {
            if slot.is_some_and(|event| event.key.owner == owner) {
                *slot = None;
            }
        }
    }

    /// Does `key` have a pending alarm?
    pub fn is_active(&self, key: EventKey) -> bool {
        self.slot_of(key).is_some()
    }

    /// Time at which `key` is next due, if armed
    pub fn due_time(&self, key: EventKey) -> Option<u64> {
        self.slot_of(key)
            .and_then(|index| self.slots[index])
            .map(|event| event.due_us)
    }

    /// Earliest time any armed alarm is due
    pub fn next_due(&self) -> Option<u64> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|event| event.armed_due)
            .min()
    }

    /// Interrupt side: move the clock to `now_us` and post every expired alarm,
    /// earliest first. Time never runs backwards.
    pub fn advance(&mut self, now_us: u64) {
        self.now_us = self.now_us.max(now_us);

        loop {
            let earliest = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    slot.and_then(|event| event.armed_due.map(|due| (due, index)))
                })
                .filter(|&(due, _)| due <= self.now_us)
                .min();

            let Some((due_us, index)) = earliest else {
                break;
            };
            if self.fired.is_full() {
                self.drop_stale_fires();
            }
            let Some(event) = self.slots[index].as_mut() else {
                break;
            };
            let fired = Fired {
                key: event.key,
                value: event.value,
                alarm: event.pending_alarm,
                due_us,
            };
            if !self.fired.push(fired) {
                log::warn!("fired queue full, deferring {:?}", fired.key);
                break;
            }
            event.armed_due = None;
        }
    }

    fn is_current(&self, fired: &Fired) -> bool {
        self.slot_of(fired.key)
            .and_then(|index| self.slots[index])
            .is_some_and(|event| event.pending_alarm == fired.alarm)
    }

    /// Compact the fired queue down to the fires their events still expect
    fn drop_stale_fires(&mut self) {
        let mut kept = FiredQueue::new();
        while let Some(fired) = self.fired.pop() {
            if self.is_current(&fired) {
                kept.push(fired);
            } else {
                log::trace!("dropping stale fire of {:?} (alarm {})", fired.key, fired.alarm);
            }
        }
        self.fired = kept;
    }

    /// Handler side: next fired alarm whose event still expects it.
    /// Stale fires (cancelled or re-armed since posting) are dropped here.
    pub fn next_fired(&mut self) -> Option<Fired> {
        while let Some(fired) = self.fired.pop() {
            if self.is_current(&fired) {
                return Some(fired);
            }
            log::trace!("dropping stale fire of {:?} (alarm {})", fired.key, fired.alarm);
        }
        None
    }

    /// Hand a handler's return value back for `fired`.
    ///
    /// `0` deactivates the event, `n` re-arms it `n` µs after `fired.due_us`.
    /// Ignored if the handler itself removed or re-armed the event.
    pub fn complete(&mut self, fired: Fired, reschedule_us: u32) {
        let Some(index) = self.slot_of(fired.key) else {
            return;
        };
        let still_ours = self.slots[index].is_some_and(|event| event.pending_alarm == fired.alarm);
        if !still_ours {
            return;
        }

        if reschedule_us == 0 {
            self.slots[index] = None;
            return;
        }

        let alarm = self.allocate_alarm();
        let due_us = fired.due_us + reschedule_us as u64;
        if let Some(event) = self.slots[index].as_mut() {
            event.pending_alarm = alarm;
            event.armed_due = Some(due_us);
            event.due_us = due_us;
        }
    }

    /// Advance to `now_us` and run every due handler through `handler`,
    /// including re-armed events that fall due again before `now_us`.
    pub fn run_until<F>(&mut self, now_us: u64, mut handler: F)
    where
        F: FnMut(EventKey, u32) -> u32,
    {
        loop {
            self.advance(now_us);
            let Some(fired) = self.next_fired() else {
                break;
            };
            let result = handler(fired.key, fired.value);
            self.complete(fired, result);
        }
    }

    /// Number of armed events
    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Drop every event and queued fire. The clock keeps its value.
    pub fn clear(&mut self) {
        self.slots = [None; SCHEDULER_CAPACITY];
        self.fired.clear();
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared scheduler as seen by one peripheral: every key it builds
/// carries that peripheral's owner id.
pub struct Timers<'a> {
    scheduler: &'a mut EventScheduler,
    owner: u8,
}

impl<'a> Timers<'a> {
    /// Scope `scheduler` to `owner`
    pub fn new(scheduler: &'a mut EventScheduler, owner: u8) -> Self {
        Self { scheduler, owner }
    }

    /// Owner id of this handle
    pub fn owner(&self) -> u8 {
        self.owner
    }

    /// Full key for handler `kind`
    pub fn key(&self, kind: u16) -> EventKey {
        EventKey::new(self.owner, kind)
    }

    /// Current scheduler time in microseconds
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Arm handler `kind`, see [`EventScheduler::add`]
    pub fn add(&mut self, kind: u16, delay_us: u32, value: u32) -> Result<AlarmId> {
        let key = self.key(kind);
        self.scheduler.add(key, delay_us, value)
    }

    /// Cancel handler `kind`; no-op when inactive
    pub fn remove(&mut self, kind: u16) {
        let key = self.key(kind);
        self.scheduler.remove(key);
    }

    /// Is handler `kind` armed?
    pub fn is_active(&self, kind: u16) -> bool {
        self.scheduler.is_active(self.key(kind))
    }

    /// Next due time of handler `kind`
    pub fn due_time(&self, kind: u16) -> Option<u64> {
        self.scheduler.due_time(self.key(kind))
    }

    /// Cancel everything this owner has armed
    pub fn remove_all(&mut self) {
        self.scheduler.remove_owner(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: EventKey = EventKey::new(0, 1);
    const OTHER: EventKey = EventKey::new(0, 2);

    #[test]
    fn test_one_shot_fires_once() {
        let mut sched = EventScheduler::new();
        sched.add(TICK, 100, 7).unwrap();

        let mut calls = Vec::new();
        sched.run_until(99, |key, value| {
            calls.push((key, value));
            0
        });
        assert!(calls.is_empty());

        sched.run_until(100, |key, value| {
            calls.push((key, value));
            0
        });
        assert_eq!(calls, vec![(TICK, 7)]);
        assert!(!sched.is_active(TICK));
    }

    #[test]
    fn test_reschedule_is_relative_to_due_time() {
        let mut sched = EventScheduler::new();
        sched.add(TICK, 1000, 0).unwrap();

        sched.advance(1000);
        let fired = sched.next_fired().unwrap();
        assert_eq!(fired.due_us, 1000);

        // Handler finishes late
        sched.advance(1300);
        sched.complete(fired, 500);
        assert_eq!(sched.due_time(TICK), Some(1500));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut sched = EventScheduler::new();
        sched.add(TICK, 10, 0).unwrap();
        sched.remove(TICK);
        sched.remove(TICK);
        assert!(!sched.is_active(TICK));
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn test_cancel_racing_fire_is_dropped() {
        let mut sched = EventScheduler::new();
        sched.add(TICK, 10, 0).unwrap();
        sched.advance(10);
        sched.remove(TICK);
        assert_eq!(sched.next_fired(), None);
    }

    #[test]
    fn test_rearm_replaces_pending_alarm() {
        let mut sched = EventScheduler::new();
        let first = sched.add(TICK, 10, 1).unwrap();
        sched.advance(10);
        let second = sched.add(TICK, 50, 2).unwrap();
        assert_ne!(first, second);

        // The fire posted for the first alarm is stale now
        assert_eq!(sched.next_fired(), None);
        assert_eq!(sched.active_count(), 1);
        assert_eq!(sched.due_time(TICK), Some(60));
    }

    #[test]
    fn test_rearm_storm_keeps_the_live_alarm() {
        let mut sched = EventScheduler::new();
        // Each re-arm leaves a stale fire queued behind it
        for step in 1..=2 * SCHEDULER_CAPACITY as u64 {
            sched.add(TICK, 1, step as u32).unwrap();
            sched.advance(step);
        }

        let fired = sched.next_fired().unwrap();
        assert_eq!(fired.value, 2 * SCHEDULER_CAPACITY as u32);
        assert_eq!(sched.next_fired(), None);
        assert!(sched.is_active(TICK));
        sched.complete(fired, 0);
        assert!(!sched.is_active(TICK));
    }

    #[test]
    fn test_full_table_rejects_new_events() {
        let mut sched = EventScheduler::new();
        for kind in 0..SCHEDULER_CAPACITY as u16 {
            sched.add(EventKey::new(1, kind), 10, 0).unwrap();
        }
        let result = sched.add(EventKey::new(2, 0), 10, 0);
        assert!(matches!(result, Err(Gf1Error::SchedulerFull { .. })));

        // Re-arming an existing event still works when full
        assert!(sched.add(EventKey::new(1, 0), 20, 0).is_ok());
    }

    #[test]
    fn test_fires_in_due_order() {
        let mut sched = EventScheduler::new();
        sched.add(OTHER, 30, 0).unwrap();
        sched.add(TICK, 20, 0).unwrap();

        let mut order = Vec::new();
        sched.run_until(40, |key, _| {
            order.push(key);
            0
        });
        assert_eq!(order, vec![TICK, OTHER]);
    }

    #[test]
    fn test_periodic_event_catches_up() {
        let mut sched = EventScheduler::new();
        sched.add(TICK, 10, 0).unwrap();

        let mut count = 0;
        sched.run_until(100, |_, _| {
            count += 1;
            10
        });
        assert_eq!(count, 10);
        assert_eq!(sched.due_time(TICK), Some(110));
    }

    #[test]
    fn test_remove_owner_only_touches_owner() {
        let mut sched = EventScheduler::new();
        sched.add(EventKey::new(1, 0), 10, 0).unwrap();
        sched.add(EventKey::new(1, 1), 10, 0).unwrap();
        sched.add(EventKey::new(2, 0), 10, 0).unwrap();
        sched.remove_owner(1);
        assert_eq!(sched.active_count(), 1);
        assert!(sched.is_active(EventKey::new(2, 0)));
    }

    #[test]
    fn test_timers_scope_keys_to_owner() {
        let mut sched = EventScheduler::new();
        {
            let mut timers = Timers::new(&mut sched, 3);
            timers.add(1, 50, 0).unwrap();
            assert!(timers.is_active(1));
            assert_eq!(timers.due_time(1), Some(50));
        }
        assert!(sched.is_active(EventKey::new(3, 1)));
        assert!(!sched.is_active(EventKey::new(0, 1)));

        Timers::new(&mut sched, 3).remove_all();
        assert_eq!(sched.active_count(), 0);
    }
}
