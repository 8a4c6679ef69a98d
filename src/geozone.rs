//! GeoZone rules: zone table, containment tests and the
//! arrival/departure state machine.
//!
//! The zone table is administered by the server through the geozone-admin
//! command property and persisted as fixed-size little-endian records.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::{error, info};

use crate::codec;
use crate::config::CONFIG;
use crate::error::Zone;
use crate::event::Event;
use crate::events::{EventAddFn, DEFAULT_EVENT_FORMAT};
use crate::geo::GeoPoint;
use crate::gps::Fix;
use crate::packet::Priority;
use crate::props::{
    self, PropStore, PROP_GEOF_ARRIVE_DELAY, PROP_GEOF_COUNT, PROP_GEOF_CURRENT,
    PROP_GEOF_DEPART_DELAY, PROP_GEOF_VERSION,
};
use crate::status::{
    COMMAND_ARGUMENTS, COMMAND_EXECUTION, COMMAND_FEATURE_NOT_SUPPORTED, COMMAND_LATLON,
    COMMAND_OK, COMMAND_OK_ACK, COMMAND_OVERFLOW, COMMAND_RADIUS, COMMAND_TYPE, COMMAND_ZONE_ID,
    STATUS_GEOFENCE_ARRIVE, STATUS_GEOFENCE_DEPART,
};

/// Zone ID 0 means "no zone".
pub const NO_ZONE: u32 = 0;

/// Zone IDs occupy two bytes on the wire and in the zone file.
pub const ZONE_ID_BYTES: usize = 2;

/// Maximum number of zones held in the table.
pub const MAX_GEOZONES: usize = 4000;

/// Packed wire size of one standard-resolution zone record.
const PACKED_ZONE_STD: usize = ZONE_ID_BYTES + 2 + 6 + 6;
/// Packed wire size of one high-resolution zone record.
const PACKED_ZONE_HIGH: usize = 4 + 2 + 8 + 8;

/// Size of one record in the zone file.
const FILE_RECORD_SIZE: usize = 20;

// admin sub-commands
const GEOF_CMD_ADD_STD: u8 = 0x10;
const GEOF_CMD_ADD_HIGH: u8 = 0x11;
const GEOF_CMD_REMOVE: u8 = 0x20;
const GEOF_CMD_SAVE: u8 = 0x30;

/// Zone shape kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZoneKind {
    /// Within the radius of either of two points.
    DualPointRadius = 0,
    /// Rectangle bounded by a north-west and a south-east point.
    BoundedRect = 1,
    /// Point radius swept between two points (tested as dual
    /// point-radius in this implementation).
    SweptPointRadius = 2,
    /// Center point with latitude/longitude deltas.
    DeltaRect = 3,
}

impl ZoneKind {
    fn from_u8(v: u8) -> Option<ZoneKind> {
        match v {
            0 => Some(ZoneKind::DualPointRadius),
            1 => Some(ZoneKind::BoundedRect),
            2 => Some(ZoneKind::SweptPointRadius),
            3 => Some(ZoneKind::DeltaRect),
            _ => None,
        }
    }
}

/// One geofenced region.
#[derive(Debug, Clone, Copy)]
pub struct GeoZone {
    /// Zone identifier (0 is reserved).
    pub zone_id: u32,
    /// Shape kind.
    pub kind: ZoneKind,
    /// Radius in meters (13 bits, at most 8191).
    pub radius_m: u16,
    /// Shape points (meaning depends on the kind).
    pub point: [GeoPoint; 2],
}

impl GeoZone {
    /// Tests whether a point falls inside this zone.
    pub fn contains(&self, gp: &GeoPoint) -> bool {
        if self.zone_id == NO_ZONE {
            return false;
        }
        match self.kind {
            // swept point-radius falls back to the dual test
            ZoneKind::DualPointRadius | ZoneKind::SweptPointRadius => {
                let radius = f64::from(self.radius_m);
                (self.point[0].is_valid() && gp.meters_to(&self.point[0]) <= radius)
                    || (self.point[1].is_valid() && gp.meters_to(&self.point[1]) <= radius)
            }
            ZoneKind::BoundedRect => {
                // no +/-180 wrap
                gp.latitude <= self.point[0].latitude
                    && gp.latitude >= self.point[1].latitude
                    && gp.longitude >= self.point[0].longitude
                    && gp.longitude <= self.point[1].longitude
            }
            ZoneKind::DeltaRect => {
                let center = self.point[0];
                let delta = self.point[1];
                gp.latitude <= center.latitude + delta.latitude
                    && gp.latitude >= center.latitude - delta.latitude
                    && gp.longitude >= center.longitude - delta.longitude
                    && gp.longitude <= center.longitude + delta.longitude
            }
        }
    }

    /// Serializes to the 20-byte little-endian file record:
    /// id u16, kind:3|radius:13 u16, then four f32 coordinates.
    fn to_record(self) -> [u8; FILE_RECORD_SIZE] {
        let mut rec = [0u8; FILE_RECORD_SIZE];
        rec[0..2].copy_from_slice(&(self.zone_id as u16).to_le_bytes());
        let type_radius = (u16::from(self.kind as u8) << 13) | (self.radius_m & 0x1FFF);
        rec[2..4].copy_from_slice(&type_radius.to_le_bytes());
        rec[4..8].copy_from_slice(&(self.point[0].latitude as f32).to_le_bytes());
        rec[8..12].copy_from_slice(&(self.point[0].longitude as f32).to_le_bytes());
        rec[12..16].copy_from_slice(&(self.point[1].latitude as f32).to_le_bytes());
        rec[16..20].copy_from_slice(&(self.point[1].longitude as f32).to_le_bytes());
        rec
    }

    fn from_record(rec: &[u8]) -> Option<GeoZone> {
        if rec.len() < FILE_RECORD_SIZE {
            return None;
        }
        let zone_id = u32::from(u16::from_le_bytes([rec[0], rec[1]]));
        let type_radius = u16::from_le_bytes([rec[2], rec[3]]);
        let kind = ZoneKind::from_u8((type_radius >> 13) as u8)?;
        let lat0 = f32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]);
        let lon0 = f32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]);
        let lat1 = f32::from_le_bytes([rec[12], rec[13], rec[14], rec[15]]);
        let lon1 = f32::from_le_bytes([rec[16], rec[17], rec[18], rec[19]]);
        Some(GeoZone {
            zone_id,
            kind,
            radius_m: type_radius & 0x1FFF,
            point: [
                GeoPoint::new(f64::from(lat0), f64::from(lon0)),
                GeoPoint::new(f64::from(lat1), f64::from(lon1)),
            ],
        })
    }

    /// Decodes a zone from its packed wire form.
    fn from_wire(data: &[u8], hi_res: bool) -> Result<GeoZone, Zone> {
        let (id_len, pt_len) = if hi_res { (4, 8) } else { (ZONE_ID_BYTES, 6) };
        if data.len() < id_len + 2 + 2 * pt_len {
            return Err(Zone::Geometry);
        }
        let zone_id = codec::read_uint(data, id_len);
        let type_radius = codec::read_uint(&data[id_len..], 2) as u16;
        let kind = ZoneKind::from_u8((type_radius >> 13) as u8).ok_or(Zone::Kind)?;
        let p0 = &data[id_len + 2..];
        let p1 = &data[id_len + 2 + pt_len..];
        let point = if hi_res {
            [GeoPoint::decode8(p0), GeoPoint::decode8(p1)]
        } else {
            [GeoPoint::decode6(p0), GeoPoint::decode6(p1)]
        };
        Ok(GeoZone {
            zone_id,
            kind,
            radius_m: type_radius & 0x1FFF,
            point,
        })
    }
}

/// The fixed-capacity zone table.
#[derive(Debug, Default)]
pub struct ZoneTable {
    zones: Vec<GeoZone>,
    dirty: bool,
}

/// The process-wide zone table.
pub static ZONES: Lazy<Mutex<ZoneTable>> = Lazy::new(|| Mutex::new(ZoneTable::default()));

impl ZoneTable {
    /// Number of valid zones.
    pub fn count(&self) -> usize {
        self.zones.iter().filter(|z| z.zone_id != NO_ZONE).count()
    }

    /// Whether the table changed since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Validates and inserts a zone. Geometry is canonicalized per kind.
    pub fn add(&mut self, mut zone: GeoZone) -> Result<(), Zone> {
        if zone.zone_id == NO_ZONE {
            return Err(Zone::ReservedId);
        }
        if zone.radius_m == 0 {
            return Err(Zone::Radius);
        }
        match zone.kind {
            ZoneKind::DualPointRadius => {
                if !zone.point[0].is_valid() {
                    if zone.point[1].is_valid() {
                        zone.point.swap(0, 1);
                        zone.point[1] = GeoPoint::default();
                    } else {
                        // at least one point must be valid
                        return Err(Zone::Geometry);
                    }
                }
            }
            ZoneKind::BoundedRect => {
                if !zone.point[0].is_valid() || !zone.point[1].is_valid() {
                    return Err(Zone::Geometry);
                }
                // canonicalize to NW/SE
                if zone.point[0].latitude < zone.point[1].latitude {
                    let tmp = zone.point[0].latitude;
                    zone.point[0].latitude = zone.point[1].latitude;
                    zone.point[1].latitude = tmp;
                }
                if zone.point[0].longitude > zone.point[1].longitude {
                    let tmp = zone.point[0].longitude;
                    zone.point[0].longitude = zone.point[1].longitude;
                    zone.point[1].longitude = tmp;
                }
            }
            ZoneKind::SweptPointRadius => {
                if !zone.point[0].is_valid() || !zone.point[1].is_valid() {
                    return Err(Zone::Geometry);
                }
            }
            ZoneKind::DeltaRect => {
                if !zone.point[0].is_valid() {
                    return Err(Zone::Geometry);
                }
                if zone.point[1].latitude == 0.0 || zone.point[1].longitude == 0.0 {
                    return Err(Zone::Geometry);
                }
                zone.point[1].latitude = zone.point[1].latitude.abs();
                zone.point[1].longitude = zone.point[1].longitude.abs();
            }
        }

        // reuse a vacated slot when one exists
        if let Some(slot) = self.zones.iter_mut().find(|z| z.zone_id == NO_ZONE) {
            *slot = zone;
        } else {
            if self.zones.len() >= MAX_GEOZONES {
                return Err(Zone::TableFull);
            }
            self.zones.push(zone);
        }
        self.dirty = true;
        Ok(())
    }

    /// Removes every zone with the given ID; `NO_ZONE` removes all.
    /// Returns `true` when anything was removed.
    pub fn remove(&mut self, zone_id: u32) -> bool {
        if zone_id == NO_ZONE {
            let had = !self.zones.is_empty();
            self.zones.clear();
            self.dirty |= had;
            return had;
        }
        let mut removed = false;
        for z in &mut self.zones {
            if z.zone_id == zone_id {
                z.zone_id = NO_ZONE;
                removed = true;
            }
        }
        while self.zones.last().map_or(false, |z| z.zone_id == NO_ZONE) {
            self.zones.pop();
        }
        self.dirty |= removed;
        removed
    }

    /// Finds the first zone containing a point.
    pub fn find(&self, gp: &GeoPoint) -> Option<&GeoZone> {
        self.zones.iter().find(|z| z.contains(gp))
    }

    /// Saves valid zones as contiguous little-endian records.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> std::io::Result<usize> {
        let mut file = File::create(path.as_ref())?;
        let mut count = 0;
        for z in self.zones.iter().filter(|z| z.zone_id != NO_ZONE) {
            file.write_all(&z.to_record())?;
            count += 1;
        }
        info!("Saved GeoZone file: {} [{count}]", path.as_ref().display());
        self.dirty = false;
        Ok(count)
    }

    /// Loads zones from a record file, replacing the table contents.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> std::io::Result<usize> {
        self.zones.clear();
        self.dirty = false;
        let mut file = File::open(path.as_ref())?;
        let mut rec = [0u8; FILE_RECORD_SIZE];
        loop {
            match file.read(&mut rec)? {
                0 => break,
                n if n < FILE_RECORD_SIZE => {
                    error!(
                        "Short GeoZone record in {} ({n} bytes)",
                        path.as_ref().display()
                    );
                    break;
                }
                _ => {
                    if let Some(zone) = GeoZone::from_record(&rec) {
                        if self.zones.len() < MAX_GEOZONES {
                            self.zones.push(zone);
                        }
                    }
                }
            }
        }
        info!(
            "Loaded GeoZones: [cnt={}] {}",
            self.zones.len(),
            path.as_ref().display()
        );
        Ok(self.zones.len())
    }
}

/// Current zone ID from the property store.
pub fn current_zone_id(props: &PropStore) -> u32 {
    props.get_u32(PROP_GEOF_CURRENT, NO_ZONE)
}

/// Records the current zone ID.
pub fn set_current_zone_id(props: &mut PropStore, zone_id: u32) {
    props.set_u32(PROP_GEOF_CURRENT, zone_id);
}

/// Records the zone table version string.
pub fn set_version(props: &mut PropStore, version: &str) {
    props.set_string(PROP_GEOF_VERSION, version);
}

/// Arrival/departure state machine over the fix stream.
///
/// Arrival and departure are confirmed only after the configured delays;
/// the emitted event is stamped with the fix that first crossed the
/// boundary (set-back stamping).
pub struct ZoneMonitor {
    queue_event: EventAddFn,
    arrive_point: Option<Fix>,
    depart_point: Option<Fix>,
}

impl ZoneMonitor {
    /// Creates the monitor.
    pub fn new(queue_event: EventAddFn) -> ZoneMonitor {
        ZoneMonitor {
            queue_event,
            arrive_point: None,
            depart_point: None,
        }
    }

    fn emit(&self, code: u16, fix: &Fix, zone_id: u32) {
        let mut ev = Event::default();
        ev.status_code = code;
        ev.set_gps(fix);
        ev.geofence_id[0] = zone_id;
        let _ = (self.queue_event)(Priority::Normal, DEFAULT_EVENT_FORMAT, &ev);
    }

    /// Examines a new fix against the zone table.
    pub fn check(
        &mut self,
        props: &mut PropStore,
        table: &ZoneTable,
        new_fix: Option<&Fix>,
        now: u32,
    ) {
        let Some(new_fix) = new_fix else {
            return;
        };

        let cur_zone = current_zone_id(props);
        let new_zone = table.find(&new_fix.point).map_or(NO_ZONE, |z| z.zone_id);

        // A transition fires only between "inside the current zone" and
        // "outside all zones"; overlapping sub-zones with distinct IDs
        // arrive/depart individually because departing one means no zone
        // contains the fix.
        let zone_change = (cur_zone != NO_ZONE) != (new_zone != NO_ZONE);
        if !zone_change {
            self.arrive_point = None;
            self.depart_point = None;
            return;
        }

        if cur_zone != NO_ZONE {
            // leaving the current zone
            if self.depart_point.map_or(true, |f| !f.is_valid()) {
                self.depart_point = Some(*new_fix);
            }
            let delay = props.get_u32(PROP_GEOF_DEPART_DELAY, 0);
            let armed = self.depart_point.unwrap_or(*new_fix);
            if delay == 0 || armed.fixtime + delay <= now {
                self.emit(STATUS_GEOFENCE_DEPART, &armed, cur_zone);
                set_current_zone_id(props, NO_ZONE);
                self.depart_point = None;
                info!("Departed zone {cur_zone}");
            }
        } else {
            self.depart_point = None;
        }

        if new_zone != NO_ZONE {
            // entering a new zone
            if self.arrive_point.map_or(true, |f| !f.is_valid()) {
                self.arrive_point = Some(*new_fix);
            }
            let delay = props.get_u32(PROP_GEOF_ARRIVE_DELAY, 0);
            let armed = self.arrive_point.unwrap_or(*new_fix);
            if delay == 0 || armed.fixtime + delay <= now {
                set_current_zone_id(props, new_zone);
                self.emit(STATUS_GEOFENCE_ARRIVE, &armed, new_zone);
                self.arrive_point = None;
                info!("Arrived zone {new_zone}");
            }
        } else {
            self.arrive_point = None;
        }
    }
}

/// Maps a zone error onto the wire command error code.
fn zone_command_code(err: Zone) -> u16 {
    match err {
        Zone::ReservedId => COMMAND_ZONE_ID,
        Zone::Radius => COMMAND_RADIUS,
        Zone::Geometry => COMMAND_LATLON,
        Zone::Kind => COMMAND_TYPE,
        Zone::TableFull => COMMAND_OVERFLOW,
    }
}

/// Geozone-admin command handler, registered on the admin property key.
/// Sub-commands: add standard/high resolution zones, remove by ID list
/// (empty list removes all), save the table.
pub fn geozone_admin_cmd(_proto_ndx: usize, _key: props::Key, data: &[u8]) -> u16 {
    if data.is_empty() {
        return COMMAND_ARGUMENTS;
    }
    let sub = data[0];
    let mut body = &data[1..];
    let mut err = COMMAND_OK;
    match sub {
        GEOF_CMD_ADD_STD | GEOF_CMD_ADD_HIGH => {
            let hi_res = sub == GEOF_CMD_ADD_HIGH;
            let rec_len = if hi_res { PACKED_ZONE_HIGH } else { PACKED_ZONE_STD };
            // the zone-table lock is released before touching properties
            let count = {
                let mut table = ZONES.lock().unwrap();
                while body.len() >= rec_len {
                    match GeoZone::from_wire(body, hi_res).and_then(|zone| table.add(zone)) {
                        Ok(()) => {}
                        Err(add_err) => err = zone_command_code(add_err),
                    }
                    body = &body[rec_len..];
                }
                if !body.is_empty() {
                    err = COMMAND_OVERFLOW;
                }
                table.count()
            };
            props::set_u32(PROP_GEOF_COUNT, count as u32);
            err
        }
        GEOF_CMD_REMOVE => {
            let mut removed_ids = Vec::new();
            let count = {
                let mut table = ZONES.lock().unwrap();
                if body.is_empty() {
                    // removes every zone
                    table.remove(NO_ZONE);
                    removed_ids.push(NO_ZONE);
                } else {
                    while body.len() >= ZONE_ID_BYTES {
                        let zone_id = codec::read_uint(body, ZONE_ID_BYTES);
                        table.remove(zone_id);
                        removed_ids.push(zone_id);
                        body = &body[ZONE_ID_BYTES..];
                    }
                    if !body.is_empty() {
                        err = COMMAND_OVERFLOW;
                    }
                }
                table.count()
            };
            let current = props::get_u32(PROP_GEOF_CURRENT, NO_ZONE);
            if removed_ids.contains(&NO_ZONE) || removed_ids.contains(&current) {
                props::set_u32(PROP_GEOF_CURRENT, NO_ZONE);
            }
            props::set_u32(PROP_GEOF_COUNT, count as u32);
            err
        }
        GEOF_CMD_SAVE => {
            let mut table = ZONES.lock().unwrap();
            match table.save(CONFIG.geozone_file()) {
                Ok(_) => COMMAND_OK_ACK,
                Err(_) => COMMAND_EXECUTION,
            }
        }
        _ => COMMAND_FEATURE_NOT_SUPPORTED,
    }
}

/// Loads the persisted zone table at startup.
pub fn initialize(props: &mut PropStore) {
    let mut table = ZONES.lock().unwrap();
    if table.load(CONFIG.geozone_file()).is_err() {
        info!(
            "GeoZone file does not exist: {}",
            CONFIG.geozone_file().display()
        );
    }
    props.set_u32(PROP_GEOF_COUNT, table.count() as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    type Captured = Arc<StdMutex<Vec<(u16, u32, u32)>>>;

    fn capture() -> (EventAddFn, Captured) {
        let seen: Captured = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let add: EventAddFn = Arc::new(move |_pri, _fmt, ev: &Event| {
            sink.lock()
                .unwrap()
                .push((ev.status_code, ev.geofence_id[0], ev.timestamp));
            true
        });
        (add, seen)
    }

    fn circle(id: u32, lat: f64, lon: f64, radius: u16) -> GeoZone {
        GeoZone {
            zone_id: id,
            kind: ZoneKind::DualPointRadius,
            radius_m: radius,
            point: [GeoPoint::new(lat, lon), GeoPoint::default()],
        }
    }

    fn fix(lat: f64, lon: f64, t: u32) -> Fix {
        Fix {
            point: GeoPoint::new(lat, lon),
            fixtime: t,
            age_timer: t,
            ..Fix::default()
        }
    }

    #[test]
    fn containment_dual_point_radius() {
        let zone = circle(1, 37.0, -122.0, 100);
        assert!(zone.contains(&GeoPoint::new(37.0, -122.0)));
        // ~80 m east
        assert!(zone.contains(&GeoPoint::new(37.0, -121.9991)));
        // ~500 m east
        assert!(!zone.contains(&GeoPoint::new(37.0, -121.9944)));
    }

    #[test]
    fn containment_bounded_rect() {
        let zone = GeoZone {
            zone_id: 2,
            kind: ZoneKind::BoundedRect,
            radius_m: 1,
            point: [GeoPoint::new(38.0, -123.0), GeoPoint::new(37.0, -122.0)],
        };
        assert!(zone.contains(&GeoPoint::new(37.5, -122.5)));
        assert!(!zone.contains(&GeoPoint::new(38.5, -122.5)));
        assert!(!zone.contains(&GeoPoint::new(37.5, -121.5)));
    }

    #[test]
    fn containment_delta_rect() {
        let zone = GeoZone {
            zone_id: 3,
            kind: ZoneKind::DeltaRect,
            radius_m: 1,
            point: [GeoPoint::new(37.0, -122.0), GeoPoint::new(0.01, 0.02)],
        };
        assert!(zone.contains(&GeoPoint::new(37.005, -122.015)));
        assert!(!zone.contains(&GeoPoint::new(37.02, -122.0)));
    }

    /// The swept type is tested as dual point-radius.
    #[test]
    fn swept_falls_back_to_dual() {
        let zone = GeoZone {
            zone_id: 4,
            kind: ZoneKind::SweptPointRadius,
            radius_m: 100,
            point: [GeoPoint::new(37.0, -122.0), GeoPoint::new(37.01, -122.0)],
        };
        assert!(zone.contains(&GeoPoint::new(37.0, -122.0)));
        assert!(zone.contains(&GeoPoint::new(37.01, -122.0)));
        // midpoint between the two endpoints, outside both radii
        assert!(!zone.contains(&GeoPoint::new(37.005, -122.0)));
    }

    #[test]
    fn add_validation() {
        let mut table = ZoneTable::default();
        assert_eq!(
            table.add(circle(NO_ZONE, 37.0, -122.0, 100)),
            Err(Zone::ReservedId)
        );
        assert_eq!(table.add(circle(1, 37.0, -122.0, 0)), Err(Zone::Radius));
        assert_eq!(table.add(circle(1, 0.0, 0.0, 100)), Err(Zone::Geometry));

        // a valid second point is moved into the first slot
        let zone = GeoZone {
            zone_id: 5,
            kind: ZoneKind::DualPointRadius,
            radius_m: 100,
            point: [GeoPoint::default(), GeoPoint::new(37.0, -122.0)],
        };
        assert!(table.add(zone).is_ok());
        assert!(table.find(&GeoPoint::new(37.0, -122.0)).is_some());

        // bounded rect canonicalizes to NW/SE
        let rect = GeoZone {
            zone_id: 6,
            kind: ZoneKind::BoundedRect,
            radius_m: 1,
            point: [GeoPoint::new(37.0, -122.0), GeoPoint::new(38.0, -123.0)],
        };
        assert!(table.add(rect).is_ok());
        assert!(table
            .find(&GeoPoint::new(37.5, -122.5))
            .map(|z| z.zone_id == 6)
            .unwrap_or(false));
    }

    #[test]
    fn remove_by_id_and_all() {
        let mut table = ZoneTable::default();
        table.add(circle(1, 37.0, -122.0, 100)).unwrap();
        table.add(circle(2, 38.0, -122.0, 100)).unwrap();
        assert_eq!(table.count(), 2);

        assert!(table.remove(1));
        assert_eq!(table.count(), 1);
        assert!(!table.remove(1));

        assert!(table.remove(NO_ZONE));
        assert_eq!(table.count(), 0);
    }

    /// Zone records survive the explicit little-endian file layout.
    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("geozone-{}.dat", std::process::id()));
        let mut table = ZoneTable::default();
        table.add(circle(42, 37.0, -122.0, 150)).unwrap();
        table
            .add(GeoZone {
                zone_id: 43,
                kind: ZoneKind::BoundedRect,
                radius_m: 1,
                point: [GeoPoint::new(38.0, -123.0), GeoPoint::new(37.0, -122.0)],
            })
            .unwrap();
        assert_eq!(table.save(&path).unwrap(), 2);
        assert!(!table.is_dirty());

        let mut loaded = ZoneTable::default();
        assert_eq!(loaded.load(&path).unwrap(), 2);
        let z = loaded.find(&GeoPoint::new(37.0, -122.0)).unwrap();
        assert_eq!(z.zone_id, 42);
        assert_eq!(z.radius_m, 150);
        assert_eq!(z.kind, ZoneKind::DualPointRadius);
        let r = loaded.find(&GeoPoint::new(37.5, -122.5)).unwrap();
        assert_eq!(r.zone_id, 43);

        std::fs::remove_file(&path).ok();
    }

    /// Crossing into a circular zone: one ARRIVE exactly after the
    /// arrival delay, stamped with the crossing fix; one DEPART after the
    /// departure delay on the way out.
    #[test]
    fn arrival_departure_scenario() {
        let mut props = PropStore::with_defaults();
        props.set_u32(PROP_GEOF_ARRIVE_DELAY, 3);
        props.set_u32(PROP_GEOF_DEPART_DELAY, 4);
        let mut table = ZoneTable::default();
        table.add(circle(42, 37.0, -122.0, 100)).unwrap();

        let (add, seen) = capture();
        let mut monitor = ZoneMonitor::new(add);

        let t0 = 1_700_000_000;
        // approaching, outside
        monitor.check(&mut props, &table, Some(&fix(37.01, -122.0, t0)), t0);
        assert_eq!(current_zone_id(&props), NO_ZONE);

        // first fix inside arms the delay
        for i in 0..6 {
            let f = fix(37.0, -122.0, t0 + 1 + i);
            monitor.check(&mut props, &table, Some(&f), t0 + 1 + i);
        }
        {
            let events = seen.lock().unwrap();
            let arrivals: Vec<_> = events
                .iter()
                .filter(|e| e.0 == STATUS_GEOFENCE_ARRIVE)
                .collect();
            assert_eq!(arrivals.len(), 1);
            assert_eq!(arrivals[0].1, 42);
            // stamped with the first in-zone fix
            assert_eq!(arrivals[0].2, t0 + 1);
        }
        assert_eq!(current_zone_id(&props), 42);

        // leaving
        for i in 0..6 {
            let f = fix(37.05, -122.0, t0 + 10 + i);
            monitor.check(&mut props, &table, Some(&f), t0 + 10 + i);
        }
        let events = seen.lock().unwrap();
        let departs: Vec<_> = events
            .iter()
            .filter(|e| e.0 == STATUS_GEOFENCE_DEPART)
            .collect();
        assert_eq!(departs.len(), 1);
        assert_eq!(departs[0].1, 42);
        assert_eq!(departs[0].2, t0 + 10);
        assert_eq!(current_zone_id(&props), NO_ZONE);
    }

    /// Admin command: add two standard-resolution zones, remove one by
    /// ID, then remove all.
    #[test]
    fn admin_command_round_trip() {
        fn packed_zone(id: u32, lat: f64, lon: f64, radius: u16) -> Vec<u8> {
            let mut out = Vec::new();
            codec::write_uint(&mut out, id, 2);
            codec::write_uint(&mut out, u32::from(radius & 0x1FFF), 2);
            GeoPoint::new(lat, lon).encode6(&mut out);
            GeoPoint::default().encode6(&mut out);
            out
        }

        // the global table is shared: start from a clean slate
        ZONES.lock().unwrap().remove(NO_ZONE);

        let mut add = vec![0x10]; // add, standard resolution
        add.extend(packed_zone(7, 37.0, -122.0, 100));
        add.extend(packed_zone(8, 38.0, -122.0, 250));
        assert_eq!(geozone_admin_cmd(0, 0xF542, &add), COMMAND_OK);
        assert_eq!(ZONES.lock().unwrap().count(), 2);

        let mut remove = vec![0x20];
        codec::write_uint(&mut remove, 7, ZONE_ID_BYTES);
        assert_eq!(geozone_admin_cmd(0, 0xF542, &remove), COMMAND_OK);
        assert_eq!(ZONES.lock().unwrap().count(), 1);

        // empty remove clears the table
        assert_eq!(geozone_admin_cmd(0, 0xF542, &[0x20]), COMMAND_OK);
        assert_eq!(ZONES.lock().unwrap().count(), 0);

        // unknown sub-command
        assert_eq!(
            geozone_admin_cmd(0, 0xF542, &[0x7F]),
            COMMAND_FEATURE_NOT_SUPPORTED
        );
        assert_eq!(geozone_admin_cmd(0, 0xF542, &[]), COMMAND_ARGUMENTS);
    }

    /// Wire-format add decoding (standard resolution).
    #[test]
    fn wire_decode_std() {
        let mut payload = Vec::new();
        codec::write_uint(&mut payload, 42, 2);
        let type_radius: u16 = (0 << 13) | 150;
        codec::write_uint(&mut payload, u32::from(type_radius), 2);
        GeoPoint::new(37.0, -122.0).encode6(&mut payload);
        GeoPoint::default().encode6(&mut payload);
        assert_eq!(payload.len(), PACKED_ZONE_STD);

        let zone = GeoZone::from_wire(&payload, false).unwrap();
        assert_eq!(zone.zone_id, 42);
        assert_eq!(zone.radius_m, 150);
        assert_eq!(zone.kind, ZoneKind::DualPointRadius);
        assert!((zone.point[0].latitude - 37.0).abs() < 1e-4);
        assert!(!zone.point[1].is_valid());

        // an unknown kind in the type/radius bits is rejected
        let mut bad = payload.clone();
        bad[2] = 0xA0; // kind 5
        assert!(matches!(
            GeoZone::from_wire(&bad, false),
            Err(Zone::Kind)
        ));
        assert!(matches!(
            GeoZone::from_wire(&payload[..8], false),
            Err(Zone::Geometry)
        ));
    }
}
