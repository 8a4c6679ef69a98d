//! Odometer / trip counters.
//!
//! Eight property-backed counters accumulate great-circle distance over
//! the fix stream. Counter 0 is the vehicle odometer (seedable from an
//! external source); counters 1..=7 are resettable trip counters. Each
//! counter keeps its reference fix in a GPS property so accumulation
//! survives restarts.

use tracing::error;

use crate::codec::round;
use crate::event::Event;
use crate::events::{EventAddFn, DEFAULT_EVENT_FORMAT};
use crate::gps::Fix;
use crate::packet::Priority;
use crate::props::{
    Key, PropStore, PROP_GPS_DISTANCE_DELTA, PROP_ODOMETER_0_GPS, PROP_ODOMETER_0_LIMIT,
    PROP_ODOMETER_0_VALUE,
};
use crate::status::STATUS_ODOM_LIMIT_0;

/// Number of odometer counters.
pub const ODOMETER_COUNT: usize = 8;

/// Accumulation is skipped below this displacement floor, meters.
const MIN_DISTANCE_DELTA: u32 = 10;

fn value_key(ndx: usize) -> Key {
    PROP_ODOMETER_0_VALUE + ndx as Key
}

fn limit_key(ndx: usize) -> Key {
    PROP_ODOMETER_0_LIMIT + ndx as Key
}

fn state_key(ndx: usize) -> Key {
    PROP_ODOMETER_0_GPS + ndx as Key
}

/// Odometer rule engine.
pub struct Odometer {
    queue_event: EventAddFn,
    first_fix: [bool; ODOMETER_COUNT],
}

impl Odometer {
    /// Creates the engine.
    pub fn new(queue_event: EventAddFn) -> Odometer {
        Odometer {
            queue_event,
            first_fix: [false; ODOMETER_COUNT],
        }
    }

    /// Actual vehicle odometer from an external source (OBC), meters.
    /// Returns 0 when unavailable.
    pub fn actual_odometer_meters(&self) -> f64 {
        0.0
    }

    /// Accumulated meters for a counter.
    pub fn distance_meters_at(&self, props: &PropStore, ndx: usize) -> f64 {
        if ndx < ODOMETER_COUNT {
            f64::from(props.get_u32(value_key(ndx), 0))
        } else {
            0.0
        }
    }

    /// Total device meters (counter 0).
    pub fn device_distance_meters(&self, props: &PropStore) -> f64 {
        self.distance_meters_at(props, 0)
    }

    /// Resets a counter to zero.
    pub fn reset_distance_at(&self, props: &mut PropStore, ndx: usize) -> bool {
        if ndx < ODOMETER_COUNT {
            props.set_u32(value_key(ndx), 0)
        } else {
            false
        }
    }

    fn emit_limit(&self, code: u16, fix: Option<&Fix>, odom_meters: u32) {
        let mut ev = Event::default();
        ev.status_code = code;
        if let Some(fix) = fix {
            ev.set_gps(fix);
        }
        ev.distance_km = f64::from(odom_meters) / 1000.0;
        let _ = (self.queue_event)(Priority::High, DEFAULT_EVENT_FORMAT, &ev);
    }

    /// Accumulates distance for every counter on a new fix and emits
    /// limit-crossing events. `new_fix` may be absent.
    pub fn check(&mut self, props: &mut PropStore, _old_fix: Option<&Fix>, new_fix: Option<&Fix>) {
        let actual_meters = round(self.actual_odometer_meters()).max(0) as u32;
        let min_delta = props
            .get_u32(PROP_GPS_DISTANCE_DELTA, 500)
            .max(MIN_DISTANCE_DELTA);

        for i in 0..ODOMETER_COUNT {
            let Some(mut state) = props.get_gps(state_key(i)) else {
                error!("Internal odometer error");
                continue;
            };

            let old_meters = props.get_u32(value_key(i), 0);
            let mut new_meters = 0u32;

            if (old_meters == 0 && !self.first_fix[i])
                || state.fixtime == 0
                || !state.point.is_valid()
            {
                // first check after a reset: re-seed the reference fix
                if i == 0 {
                    new_meters = if actual_meters > 0 {
                        actual_meters
                    } else {
                        old_meters
                    };
                    state.meters = 0;
                } else {
                    new_meters = 0;
                    state.meters = round(self.device_distance_meters(props)).max(0) as u32;
                }
                props.set_u32(value_key(i), new_meters);
                if let Some(fix) = new_fix {
                    state.point = fix.point;
                    state.fixtime = fix.fixtime;
                }
                props.set_gps(state_key(i), &state);
                self.first_fix[i] = true;
            } else if let Some(fix) = new_fix {
                let delta = round(fix.point.meters_to(&state.point)).max(0) as u32;
                if delta >= min_delta {
                    // far enough to plant a new stake in the ground
                    new_meters = if self.first_fix[i] {
                        delta
                    } else {
                        delta.saturating_add(old_meters)
                    };
                    props.set_u32(value_key(i), new_meters);
                    state.point = fix.point;
                    state.fixtime = fix.fixtime;
                    props.set_gps(state_key(i), &state);
                    self.first_fix[i] = false;
                }
            }

            // limit crossings fire exactly once, at the crossing
            if new_meters > 0 {
                let limit = props.get_u32(limit_key(i), 0);
                if limit > old_meters && limit <= new_meters {
                    self.emit_limit(STATUS_ODOM_LIMIT_0 + i as u16, new_fix, new_meters);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(u16, f64)>>>;

    fn capture() -> (EventAddFn, Captured) {
        let seen: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let add: EventAddFn = Arc::new(move |_pri, _fmt, ev: &Event| {
            sink.lock().unwrap().push((ev.status_code, ev.distance_km));
            true
        });
        (add, seen)
    }

    fn fix(lat: f64, lon: f64, t: u32) -> Fix {
        Fix {
            point: GeoPoint::new(lat, lon),
            fixtime: t,
            age_timer: t,
            ..Fix::default()
        }
    }

    /// Distance accumulates only when the increment clears the configured
    /// floor, and the reference fix advances with each stake.
    #[test]
    fn accumulates_distance() {
        let mut props = PropStore::with_defaults();
        props.set_u32(PROP_GPS_DISTANCE_DELTA, 100);
        let (add, _seen) = capture();
        let mut odom = Odometer::new(add);

        let t0 = 1_700_000_000;
        let start = fix(37.0000, -122.0000, t0);
        odom.check(&mut props, None, Some(&start));
        assert_eq!(props.get_u32(value_key(1), 0), 0);

        // ~1.11 km north
        let step = fix(37.0100, -122.0000, t0 + 60);
        odom.check(&mut props, Some(&start), Some(&step));
        let meters = props.get_u32(value_key(1), 0);
        assert!((1050..1180).contains(&meters), "got {meters} m");

        // a 20 m drift is below the 100 m floor: no accumulation
        let drift = fix(37.0101, -122.0000, t0 + 90);
        odom.check(&mut props, Some(&step), Some(&drift));
        assert_eq!(props.get_u32(value_key(1), 0), meters);

        // another large step adds on top
        let step2 = fix(37.0200, -122.0000, t0 + 120);
        odom.check(&mut props, Some(&drift), Some(&step2));
        assert!(props.get_u32(value_key(1), 0) > meters);
    }

    /// Crossing a non-zero limit emits the counter's status code once.
    #[test]
    fn limit_crossing_emits_once() {
        let mut props = PropStore::with_defaults();
        props.set_u32(PROP_GPS_DISTANCE_DELTA, 100);
        props.set_u32(limit_key(2), 1000);
        let (add, seen) = capture();
        let mut odom = Odometer::new(add);

        let t0 = 1_700_000_000;
        odom.check(&mut props, None, Some(&fix(37.0000, -122.0000, t0)));
        odom.check(
            &mut props,
            None,
            Some(&fix(37.0100, -122.0000, t0 + 60)),
        );

        let crossings: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.0 == STATUS_ODOM_LIMIT_0 + 2)
            .cloned()
            .collect();
        assert_eq!(crossings.len(), 1);
        assert!(crossings[0].1 > 1.0); // km

        // further accumulation does not re-fire the alarm
        odom.check(
            &mut props,
            None,
            Some(&fix(37.0200, -122.0000, t0 + 120)),
        );
        let count = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.0 == STATUS_ODOM_LIMIT_0 + 2)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn reset_rearms_counter() {
        let mut props = PropStore::with_defaults();
        props.set_u32(PROP_GPS_DISTANCE_DELTA, 100);
        let (add, _seen) = capture();
        let mut odom = Odometer::new(add);

        let t0 = 1_700_000_000;
        odom.check(&mut props, None, Some(&fix(37.0000, -122.0000, t0)));
        odom.check(&mut props, None, Some(&fix(37.0100, -122.0000, t0 + 60)));
        assert!(props.get_u32(value_key(3), 0) > 0);

        assert!(odom.reset_distance_at(&mut props, 3));
        assert_eq!(props.get_u32(value_key(3), 0), 0);
    }
}
