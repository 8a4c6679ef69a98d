//! Main GPS acquisition/process loop.
//!
//! A periodic ticker samples the GPS at the configured interval, fans new
//! fixes out to the rule engines, drives the fix staleness state machine,
//! invokes the protocol driver, and performs housekeeping. The loop
//! sleeps in small increments that ramp toward one second over quiet
//! periods and snap back on activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::accounting::ACCOUNTING;
use crate::config::CONFIG;
use crate::event::Event;
use crate::events::{EventAddFn, DEFAULT_EVENT_FORMAT, EVENT_QUEUE};
use crate::geozone::{ZoneMonitor, ZONES};
use crate::gps::{Fix, GPS};
use crate::motion::Motion;
use crate::odometer::Odometer;
use crate::packet::{Encoding, Priority};
use crate::props::{
    PROPS, PROP_GPS_AQUIRE_WAIT, PROP_GPS_EXPIRATION, PROP_GPS_SAMPLE_RATE,
    PROP_STATE_DEV_DIAGNOSTIC, PROP_STATE_QUEUED_EVENTS, PROP_STATE_TIME,
};
use crate::protocol::Protocol;
use crate::status::STATUS_INITIALIZED;

/// Idle sleep per pass, milliseconds.
const STANDARD_LOOP_DELAY: u64 = 1000;
/// Sleep immediately after activity, milliseconds.
const FAST_LOOP_DELAY: u64 = 20;
/// Sleep ramp per quiet pass, milliseconds.
const LOOP_DELAY_INCREMENT: u64 = 30;

/// The periodic sampling/dispatch loop and the state it owns.
pub struct MainLoop {
    run: Arc<AtomicBool>,
    queue_event: EventAddFn,
    motion: Motion,
    odometer: Odometer,
    zones: ZoneMonitor,
    protocol: Protocol,
    serial_transport: bool,
    encoding: Encoding,
    last_acquisition: u32,
    last_module_check: u32,
    last_valid_fix: Option<Fix>,
    stale_timer: u32,
}

impl MainLoop {
    /// Builds the loop around the protocol driver and the event-add
    /// callback injected into every rule engine.
    pub fn new(
        protocol: Protocol,
        queue_event: EventAddFn,
        serial_transport: bool,
        run: Arc<AtomicBool>,
    ) -> MainLoop {
        MainLoop {
            run,
            motion: Motion::new(Arc::clone(&queue_event), serial_transport),
            odometer: Odometer::new(Arc::clone(&queue_event)),
            zones: ZoneMonitor::new(Arc::clone(&queue_event)),
            queue_event,
            protocol,
            serial_transport,
            encoding: Encoding::Binary,
            last_acquisition: 0,
            last_module_check: 0,
            last_valid_fix: None,
            stale_timer: 0,
        }
    }

    fn now() -> u32 {
        u32::try_from(Utc::now().timestamp()).unwrap_or(0)
    }

    fn timer_expired(timer: u32, interval: u32, now: u32) -> bool {
        timer == 0 || now.saturating_sub(timer) >= interval
    }

    /// Fans a (possibly absent) fix out to every rule engine.
    fn check_modules(&mut self, old_fix: Option<&Fix>, new_fix: Option<&Fix>, now: u32) {
        {
            let store = PROPS.lock().unwrap();
            self.motion.check(&store, old_fix, new_fix, now);
        }
        {
            let mut store = PROPS.lock().unwrap();
            self.odometer.check(&mut store, old_fix, new_fix);
        }
        {
            let mut store = PROPS.lock().unwrap();
            let zones = ZONES.lock().unwrap();
            self.zones.check(&mut store, &zones, new_fix, now);
        }
    }

    /// One acquisition pass: pick up a fresh fix and run the rules, or
    /// advance the staleness state machine.
    fn acquire_and_check(&mut self, now: u32) {
        let (acquire_wait, expire) = {
            let store = PROPS.lock().unwrap();
            (
                store.get_u32(PROP_GPS_AQUIRE_WAIT, 0),
                store.get_u32(PROP_GPS_EXPIRATION, 300),
            )
        };

        let fresh = GPS
            .acquire(acquire_wait)
            .map(|f| f.apply_minimums())
            .filter(|f| {
                f.is_valid() && self.last_valid_fix.map_or(true, |old| old.fixtime != f.fixtime)
            });

        if let Some(new_fix) = fresh {
            if self.last_valid_fix.is_none() {
                info!(
                    "First GPS fix: {:.5}/{:.5}",
                    new_fix.point.latitude, new_fix.point.longitude
                );
                let mut ev = Event::with_fix(STATUS_INITIALIZED, new_fix.fixtime, &new_fix);
                ev.timestamp = new_fix.fixtime;
                let _ = (self.queue_event)(Priority::Normal, DEFAULT_EVENT_FORMAT, &ev);
            }
            self.last_acquisition = now;
            self.last_module_check = now;
            let old_fix = self.last_valid_fix;
            self.check_modules(old_fix.as_ref(), Some(&new_fix), now);
            self.last_valid_fix = Some(new_fix);

            if GPS.is_stale() {
                debug!("GPS fix is now up to date");
                GPS.set_stale(false);
            }
            self.stale_timer = 0;
            return;
        }

        // no new valid fix: advance the staleness machine
        if !GPS.is_stale() {
            if expire == 0 {
                // a zero expiration means the fix never goes stale
            } else if let Some(last) = self.last_valid_fix.as_ref().filter(|f| f.is_valid()) {
                self.stale_timer = last.age_timer;
                if now.saturating_sub(self.stale_timer) >= expire {
                    self.mark_stale();
                }
            } else if self.stale_timer == 0 {
                // first miss after boot: arm the expiration timer
                self.stale_timer = now;
            } else if now.saturating_sub(self.stale_timer) >= expire {
                self.mark_stale();
            }
        }

        // run the rules periodically even without a fix
        let interval = PROPS.lock().unwrap().get_u32(PROP_GPS_SAMPLE_RATE, 15);
        if Self::timer_expired(self.last_module_check, 2 * interval.max(1), now) {
            self.last_module_check = now;
            let old_fix = self.last_valid_fix;
            self.check_modules(old_fix.as_ref(), None, now);
        }
    }

    fn mark_stale(&mut self) {
        error!("GPS fix is expired");
        GPS.set_stale(true);
        // one-shot protocol error; cleared when a fix returns
        let _ = self.protocol.queue_gps_expired();
    }

    /// Housekeeping: refresh the clock/queue state properties and
    /// persist dirty properties.
    fn housekeeping(&mut self, now: u32) {
        let mut store = PROPS.lock().unwrap();
        store.set_u32(PROP_STATE_TIME, now);
        store.set_u32_at(
            PROP_STATE_QUEUED_EVENTS,
            0,
            crate::events::packet_count() as u32,
        );
        store.set_u32_at(PROP_STATE_QUEUED_EVENTS, 1, crate::events::total_packet_count());
        // devdiag is a saved property: only touch it on change
        let severe = u32::from(self.protocol.total_severe_errors());
        if store.get_u32(PROP_STATE_DEV_DIAGNOSTIC, 0) != severe {
            store.set_u32_at(PROP_STATE_DEV_DIAGNOSTIC, 0, severe);
        }
        if store.has_changed() {
            if let Err(e) = store.save(CONFIG.props_file(), false) {
                error!("Unable to save properties: {e}");
            }
        }
    }

    /// Runs until the stop flag clears. Does not return during normal
    /// operation.
    pub fn run(&mut self) {
        let mut loop_delay = STANDARD_LOOP_DELAY;
        while self.run.load(Ordering::SeqCst) {
            let now = Self::now();

            let interval = PROPS.lock().unwrap().get_u32(PROP_GPS_SAMPLE_RATE, 15);
            if Self::timer_expired(self.last_acquisition, interval, now) {
                let had_fix = self.last_valid_fix.map(|f| f.fixtime);
                self.acquire_and_check(now);
                if self.last_valid_fix.map(|f| f.fixtime) != had_fix {
                    loop_delay = FAST_LOOP_DELAY;
                }
            }

            self.housekeeping(now);

            // transmit when the policy allows; blocks for the duration
            // of the session
            let had_session = self
                .protocol
                .transport_cycle(&PROPS, &ACCOUNTING, &EVENT_QUEUE, self.encoding, now);
            if had_session && self.serial_transport {
                // serial sessions restart the moving-report cadence
                self.motion.reset_moving_timer();
            }

            std::thread::sleep(Duration::from_millis(loop_delay));
            if loop_delay < STANDARD_LOOP_DELAY {
                loop_delay = (loop_delay + LOOP_DELAY_INCREMENT).min(STANDARD_LOOP_DELAY);
            }
        }
        error!("Main loop is terminating");
    }
}
