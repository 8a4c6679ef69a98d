//! Motion rule engine.
//!
//! Examines consecutive GPS fixes and emits start/stop, in-motion,
//! dormant, excess-speed and moving events according to the motion
//! properties.

use tracing::debug;

use crate::config::CONFIG;
use crate::event::Event;
use crate::events::{EventAddFn, DEFAULT_EVENT_FORMAT};
use crate::gps::Fix;
use crate::packet::Priority;
use crate::props::{
    PropStore, PROP_MOTION_DORMANT_COUNT, PROP_MOTION_DORMANT_INTRVL, PROP_MOTION_EXCESS_SPEED,
    PROP_MOTION_IN_MOTION, PROP_MOTION_MOVING_INTRVL, PROP_MOTION_START, PROP_MOTION_START_TYPE,
    PROP_MOTION_STOP, PROP_MOTION_STOP_TYPE,
};
use crate::status::{
    STATUS_MOTION_DORMANT, STATUS_MOTION_EXCESS_SPEED, STATUS_MOTION_IN_MOTION,
    STATUS_MOTION_MOVING, STATUS_MOTION_START, STATUS_MOTION_STOP,
};

/// Motion start definition: GPS speed threshold in kph.
pub const MOTION_START_GPS_KPH: u32 = 0;
/// Motion start definition: GPS displacement threshold in meters.
pub const MOTION_START_GPS_METERS: u32 = 1;
/// Motion start definition: OBC-reported speed in kph.
pub const MOTION_START_OBC_KPH: u32 = 2;

/// Stop events are stamped with the fix current at delay expiry.
pub const MOTION_STOP_AFTER_DELAY: u32 = 0;
/// Stop events are stamped with the fix stored when motion ceased.
pub const MOTION_STOP_WHEN_STOPPED: u32 = 1;

/// Minimum in-motion event interval on server transports, seconds.
const MIN_IN_MOTION_INTERVAL: u32 = 60;
/// Minimum dormant event interval on server transports, seconds.
const MIN_DORMANT_INTERVAL: u32 = 300;
/// A triggered excess-speed indicator resets only after slowing this far
/// below the threshold, kph.
const EXCESS_SPEED_SETBACK: f64 = 5.0;

/// Motion detection state machine.
pub struct Motion {
    queue_event: EventAddFn,
    serial_transport: bool,
    is_in_motion: bool,
    is_exceeding_speed: bool,
    last_motion_fix: Option<Fix>,
    last_stopped_fix: Option<Fix>,
    last_stopped_timer: u32,
    last_in_motion_emit: u32,
    last_moving_emit: u32,
    last_dormant_emit: u32,
    dormant_count: u32,
}

impl Motion {
    /// Creates the engine. `serial_transport` enables the simple moving
    /// report used by always-connected serial links.
    pub fn new(queue_event: EventAddFn, serial_transport: bool) -> Motion {
        Motion {
            queue_event,
            serial_transport,
            is_in_motion: false,
            is_exceeding_speed: false,
            last_motion_fix: None,
            last_stopped_fix: None,
            last_stopped_timer: 0,
            last_in_motion_emit: 0,
            last_moving_emit: 0,
            last_dormant_emit: 0,
            dormant_count: 0,
        }
    }

    /// Resets the moving-report timer (after a serial session opens).
    pub fn reset_moving_timer(&mut self) {
        self.last_moving_emit = 0;
    }

    fn emit(&self, priority: Priority, code: u16, timestamp: u32, fix: Option<&Fix>) {
        let mut ev = Event {
            status_code: code,
            timestamp,
            ..Event::default()
        };
        if let Some(fix) = fix {
            ev.set_gps(fix);
            ev.timestamp = timestamp;
        }
        let _ = (self.queue_event)(priority, DEFAULT_EVENT_FORMAT, &ev);
    }

    fn timer_expired(timer: u32, interval: u32, now: u32) -> bool {
        timer == 0 || now.saturating_sub(timer) >= interval
    }

    /// Sends the stop event per the configured stop type.
    fn motion_stop(&mut self, props: &PropStore, now: u32, new_fix: Option<&Fix>) {
        self.is_in_motion = false;

        let stop_type = props.get_u32(PROP_MOTION_STOP_TYPE, MOTION_STOP_AFTER_DELAY);
        let (stopped_time, stopped_fix) = if stop_type == MOTION_STOP_WHEN_STOPPED {
            let fix = self.last_stopped_fix.filter(Fix::is_valid);
            let time = if self.last_stopped_timer != 0 {
                self.last_stopped_timer
            } else {
                now
            };
            (time, fix.or_else(|| new_fix.copied()))
        } else {
            (now, new_fix.copied())
        };
        self.emit(
            Priority::Normal,
            STATUS_MOTION_STOP,
            stopped_time,
            stopped_fix.as_ref(),
        );

        self.last_stopped_fix = None;
        self.last_stopped_timer = 0;
    }

    /// Examines a new fix (possibly absent) against the motion rules.
    /// `now` is the current UTC time in seconds.
    pub fn check(&mut self, props: &PropStore, _old_fix: Option<&Fix>, new_fix: Option<&Fix>, now: u32) {
        let start_type = props.get_u32(PROP_MOTION_START_TYPE, MOTION_START_GPS_KPH);
        let motion_start = props.get_double(PROP_MOTION_START, 0.0);
        let speed_kph = new_fix.map_or(0.0, |f| f.speed_kph.max(0.0));

        let mut currently_moving = false;
        if motion_start > 0.0 {
            if self.last_motion_fix.map_or(true, |f| !f.is_valid()) {
                self.last_motion_fix = new_fix.copied();
            }

            if start_type == MOTION_START_GPS_METERS {
                if let (Some(new), Some(last)) = (new_fix, self.last_motion_fix.as_ref()) {
                    if new.is_valid() && last.is_valid() {
                        let delta = new.point.meters_to(&last.point);
                        if delta >= motion_start {
                            currently_moving = true;
                        }
                    }
                }
            } else if speed_kph >= motion_start {
                // GPS and OBC speed checks share the kph comparison
                currently_moving = true;
            }

            if currently_moving {
                self.last_stopped_timer = 0;
                self.last_stopped_fix = None;
                self.last_motion_fix = new_fix.copied();
                if !self.is_in_motion {
                    self.is_in_motion = true;
                    self.last_in_motion_emit = now;
                    self.emit(Priority::Normal, STATUS_MOTION_START, now, new_fix);
                }
            } else if self.is_in_motion {
                if self.last_stopped_timer == 0 {
                    // first non-moving sample arms the stop timer
                    self.last_stopped_timer = now;
                    self.last_stopped_fix = new_fix.copied();
                }
                let stop_delay = props.get_u32(PROP_MOTION_STOP, 0);
                if now.saturating_sub(self.last_stopped_timer) >= stop_delay {
                    self.last_motion_fix = new_fix.copied();
                    self.motion_stop(props, now, new_fix);
                } else {
                    debug!("Not yet officially stopped");
                }
            }
        } else {
            // start/stop tracking was turned off while moving
            self.is_in_motion = false;
            currently_moving = speed_kph >= 2.0;
        }

        if self.is_in_motion {
            // periodic in-motion reports between start and stop
            let mut interval = props.get_u32(PROP_MOTION_IN_MOTION, 0);
            if interval > 0 {
                if interval < MIN_IN_MOTION_INTERVAL && !CONFIG.debug() {
                    interval = MIN_IN_MOTION_INTERVAL;
                }
                let stop_type = props.get_u32(PROP_MOTION_STOP_TYPE, MOTION_STOP_AFTER_DELAY);
                if stop_type == MOTION_STOP_WHEN_STOPPED && !currently_moving {
                    // in-motion reports are suspended while not actually
                    // moving in when-stopped mode
                } else if now.saturating_sub(self.last_in_motion_emit) >= interval {
                    self.last_in_motion_emit = now;
                    self.emit(Priority::Low, STATUS_MOTION_IN_MOTION, now, new_fix);
                }
            }
            self.last_dormant_emit = 0;
            self.dormant_count = 0;
        } else {
            // dormant heartbeats while stopped
            let mut interval = props.get_u32(PROP_MOTION_DORMANT_INTRVL, 0);
            if interval > 0 {
                if interval < MIN_DORMANT_INTERVAL && !CONFIG.debug() {
                    interval = MIN_DORMANT_INTERVAL;
                }
                let max_count = props.get_u32(PROP_MOTION_DORMANT_COUNT, 0);
                if max_count == 0 || self.dormant_count < max_count {
                    if self.last_dormant_emit == 0 {
                        self.last_dormant_emit = now;
                        self.dormant_count = 0;
                    } else if now.saturating_sub(self.last_dormant_emit) >= interval {
                        self.last_dormant_emit = now;
                        self.emit(Priority::Low, STATUS_MOTION_DORMANT, now, new_fix);
                        self.dormant_count += 1;
                    }
                }
            }
        }

        // excess speed with setback
        let max_speed = props.get_double(PROP_MOTION_EXCESS_SPEED, 0.0);
        if max_speed > 0.0 {
            if speed_kph >= max_speed {
                if !self.is_exceeding_speed {
                    self.is_exceeding_speed = true;
                    self.emit(Priority::Normal, STATUS_MOTION_EXCESS_SPEED, now, new_fix);
                }
            } else if self.is_exceeding_speed {
                let setback = if max_speed > EXCESS_SPEED_SETBACK {
                    max_speed - EXCESS_SPEED_SETBACK
                } else {
                    max_speed
                };
                if speed_kph < setback {
                    self.is_exceeding_speed = false;
                }
            }
        } else {
            self.is_exceeding_speed = false;
        }

        // simple moving report, serial transports only
        if self.serial_transport && currently_moving {
            let interval = props.get_u32(PROP_MOTION_MOVING_INTRVL, 0);
            if interval > 0 && Self::timer_expired(self.last_moving_emit, interval, now) {
                self.last_moving_emit = now;
                self.emit(Priority::Normal, STATUS_MOTION_MOVING, now, new_fix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(u16, u32)>>>;

    fn capture() -> (EventAddFn, Captured) {
        let seen: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let add: EventAddFn = Arc::new(move |_pri, _fmt, ev: &Event| {
            sink.lock().unwrap().push((ev.status_code, ev.timestamp));
            true
        });
        (add, seen)
    }

    fn fix_at(speed_kph: f64, fixtime: u32) -> Fix {
        Fix {
            point: GeoPoint::new(37.7749, -122.4194),
            fixtime,
            age_timer: fixtime,
            speed_kph,
            heading: 90.0,
            ..Fix::default()
        }
    }

    fn configure(start_kph: f64, stop_secs: u32, in_motion: u32) -> PropStore {
        let mut s = PropStore::with_defaults();
        s.set_double(PROP_MOTION_START, start_kph);
        s.set_u32(PROP_MOTION_START_TYPE, MOTION_START_GPS_KPH);
        s.set_u32(PROP_MOTION_STOP, stop_secs);
        s.set_u32(PROP_MOTION_STOP_TYPE, MOTION_STOP_AFTER_DELAY);
        s.set_u32(PROP_MOTION_IN_MOTION, in_motion);
        s.set_u32(PROP_MOTION_DORMANT_INTRVL, 0);
        s.set_double(PROP_MOTION_EXCESS_SPEED, 0.0);
        s
    }

    /// Climb above the start threshold, hold, then stop: exactly one
    /// START, periodic IN_MOTION reports, one STOP after the stop delay.
    #[test]
    fn start_in_motion_stop_sequence() {
        let props = configure(10.0, 5, 10);
        let (add, seen) = capture();
        let mut motion = Motion::new(add, false);

        let t0 = 1_700_000_000;
        // 10 moving fixes 1 s apart
        for i in 0..10 {
            let f = fix_at(30.0, t0 + i);
            motion.check(&props, None, Some(&f), t0 + i);
        }
        // 20 stopped fixes
        for i in 10..30 {
            let f = fix_at(0.0, t0 + i);
            motion.check(&props, None, Some(&f), t0 + i);
        }

        let events = seen.lock().unwrap();
        let starts: Vec<_> = events.iter().filter(|e| e.0 == STATUS_MOTION_START).collect();
        let stops: Vec<_> = events.iter().filter(|e| e.0 == STATUS_MOTION_STOP).collect();
        let in_motion: Vec<_> = events
            .iter()
            .filter(|e| e.0 == STATUS_MOTION_IN_MOTION)
            .collect();

        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].1, t0);
        assert_eq!(stops.len(), 1);
        // stop delay armed at t0+10, expires 5 s later (after-delay mode
        // stamps the expiry time)
        assert_eq!(stops[0].1, t0 + 15);
        assert!(!in_motion.is_empty());
        // no further events once stopped
        let after_stop = events
            .iter()
            .filter(|e| e.1 > t0 + 15 && e.0 != STATUS_MOTION_DORMANT)
            .count();
        assert_eq!(after_stop, 0);
    }

    /// In when-stopped mode the stop event is back-dated to the moment
    /// motion actually ceased.
    #[test]
    fn stop_when_stopped_backdates() {
        let mut props = configure(10.0, 5, 0);
        props.set_u32(PROP_MOTION_STOP_TYPE, MOTION_STOP_WHEN_STOPPED);
        let (add, seen) = capture();
        let mut motion = Motion::new(add, false);

        let t0 = 1_700_000_000;
        motion.check(&props, None, Some(&fix_at(30.0, t0)), t0);
        for i in 1..10 {
            motion.check(&props, None, Some(&fix_at(0.0, t0 + i)), t0 + i);
        }

        let events = seen.lock().unwrap();
        let stop = events
            .iter()
            .find(|e| e.0 == STATUS_MOTION_STOP)
            .expect("stop event");
        // armed at the first non-moving sample
        assert_eq!(stop.1, t0 + 1);
    }

    /// Excess speed triggers on the rising edge and resets only after the
    /// 5 kph setback.
    #[test]
    fn excess_speed_setback() {
        let mut props = configure(0.0, 0, 0);
        props.set_double(PROP_MOTION_EXCESS_SPEED, 100.0);
        let (add, seen) = capture();
        let mut motion = Motion::new(add, false);

        let t0 = 1_700_000_000;
        motion.check(&props, None, Some(&fix_at(105.0, t0)), t0);
        motion.check(&props, None, Some(&fix_at(110.0, t0 + 1)), t0 + 1);
        // above the setback floor: indicator stays latched
        motion.check(&props, None, Some(&fix_at(97.0, t0 + 2)), t0 + 2);
        motion.check(&props, None, Some(&fix_at(104.0, t0 + 3)), t0 + 3);
        // below threshold - 5: indicator resets, next crossing fires again
        motion.check(&props, None, Some(&fix_at(90.0, t0 + 4)), t0 + 4);
        motion.check(&props, None, Some(&fix_at(101.0, t0 + 5)), t0 + 5);

        let events = seen.lock().unwrap();
        let speeding = events
            .iter()
            .filter(|e| e.0 == STATUS_MOTION_EXCESS_SPEED)
            .count();
        assert_eq!(speeding, 2);
    }

    /// Dormant heartbeats are limited by the configured count and the
    /// first interval only arms the timer.
    #[test]
    fn dormant_count_limit() {
        let mut props = configure(10.0, 0, 0);
        props.set_u32(PROP_MOTION_DORMANT_INTRVL, 10);
        props.set_u32(PROP_MOTION_DORMANT_COUNT, 2);
        let (add, seen) = capture();
        let mut motion = Motion::new(add, false);

        let t0 = 1_700_000_000;
        for i in 0..10 {
            let f = fix_at(0.0, t0 + i * 10);
            motion.check(&props, None, Some(&f), t0 + i * 10);
        }
        let dormant = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.0 == STATUS_MOTION_DORMANT)
            .count();
        assert_eq!(dormant, 2);
    }

    /// Displacement-based start: a jump beyond the meter threshold counts
    /// as motion even at zero reported speed.
    #[test]
    fn start_by_distance() {
        let mut props = configure(200.0, 0, 0);
        props.set_u32(PROP_MOTION_START_TYPE, MOTION_START_GPS_METERS);
        let (add, seen) = capture();
        let mut motion = Motion::new(add, false);

        let t0 = 1_700_000_000;
        let here = fix_at(0.0, t0);
        motion.check(&props, None, Some(&here), t0);
        // ~1.1 km north
        let there = Fix {
            point: GeoPoint::new(37.7849, -122.4194),
            fixtime: t0 + 60,
            age_timer: t0 + 60,
            speed_kph: 0.0,
            ..Fix::default()
        };
        motion.check(&props, Some(&here), Some(&there), t0 + 60);

        let starts = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.0 == STATUS_MOTION_START)
            .count();
        assert_eq!(starts, 1);
    }
}
