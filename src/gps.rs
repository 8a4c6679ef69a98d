//! GPS acquisition.
//!
//! A reader task drains NMEA-0183 sentences from the configured serial
//! port, assembles fixes out of GPRMC/GPGGA/GPGSA sentences (which may
//! arrive in either order), and publishes the latest complete fix. The
//! main loop reads coherent snapshots and drives the staleness flag.

#![allow(missing_debug_implementations)]

use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitflags::bitflags;
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use crate::error;
use crate::geo::{GeoPoint, GpsOdometer, KILOMETERS_PER_KNOT};
use crate::props::{
    self, PROP_CFG_GPS_BPS, PROP_CFG_GPS_PORT, PROP_GPS_CLOCK_DELTA, PROP_GPS_MIN_SPEED,
    PROP_STATE_GPS_DIAGNOSTIC,
};

/// Restart the receiver port when no GPRMC (A or V) has been seen for
/// this many seconds. Typical receivers emit GPRMC once per second.
pub const GPS_EVENT_INTERVAL: u32 = 30;

/// Fix times below this epoch (2000-01-01) are rejected.
pub const MIN_CLOCK_TIME: u32 = 946_684_800;

/// GPRMC/GPGGA contributions are merged only when their fix times agree
/// within this many seconds.
const MERGE_WINDOW: u32 = 5;

/// DOP values decay to undefined when not refreshed for this long.
const DOP_DECAY: u32 = 60;

/// Serial read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

bitflags! {
    /// NMEA sentence types contributing to a fix.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NmeaMask: u32 {
        /// Recommended minimum data.
        const GPRMC = 0x0001;
        /// Fix data (altitude, HDOP).
        const GPGGA = 0x0002;
        /// DOP and active satellites.
        const GPGSA = 0x0004;
    }
}

/// One GPS observation, assembled from NMEA sentences sharing a fix time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fix {
    /// Position.
    pub point: GeoPoint,
    /// Fix time, UTC seconds.
    pub fixtime: u32,
    /// Timer value when the fix was received (freshness reference).
    pub age_timer: u32,
    /// Estimated accuracy, meters (0 = unknown).
    pub accuracy: f64,
    /// Speed over ground, kph (negative = unknown).
    pub speed_kph: f64,
    /// True heading, degrees (negative = unknown).
    pub heading: f64,
    /// Altitude above mean sea level, meters.
    pub altitude: f64,
    /// Position dilution of precision (0 = undefined).
    pub pdop: f64,
    /// Horizontal dilution of precision (0 = undefined).
    pub hdop: f64,
    /// Vertical dilution of precision (0 = undefined).
    pub vdop: f64,
    /// Fix quality (0 = none, 1 = GPS, 2 = DGPS).
    pub fix_quality: u16,
    /// Sentence types merged into this fix.
    pub nmea: NmeaMask,
}

impl Fix {
    /// A fix is valid iff its point is valid.
    pub fn is_valid(&self) -> bool {
        self.point.is_valid()
    }

    /// Converts to the property-store representation with an odometer
    /// reading.
    pub fn to_odometer(&self, meters: u32) -> GpsOdometer {
        GpsOdometer {
            point: self.point,
            fixtime: self.fixtime,
            meters,
        }
    }

    /// Zeroes out speed and heading below the configured minimum speed,
    /// suppressing low-speed jitter.
    pub fn apply_minimums(mut self) -> Fix {
        let min_speed = props::get_double(PROP_GPS_MIN_SPEED, 0.0);
        if self.speed_kph >= 0.0 && self.speed_kph < min_speed {
            self.speed_kph = 0.0;
            self.heading = 0.0;
        }
        self
    }
}

/// GPRMC fix validity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    /// GPS fix active.
    Active,
    /// GPS fix not valid.
    Void,
}

impl FromStr for FixStatus {
    type Err = error::Gps;

    fn from_str(s: &str) -> Result<FixStatus, Self::Err> {
        match s {
            "A" => Ok(FixStatus::Active),
            "V" => Ok(FixStatus::Void),
            _ => Err(error::Gps::InvalidStatus {
                status: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                FixStatus::Active => "A",
                FixStatus::Void => "V",
            }
        )
    }
}

/// Receiver health counters, mirrored into `sta.gpsdiag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    /// Timer of the last GPRMC of any validity.
    pub last_sample_time: u32,
    /// Timer of the last valid fix contribution.
    pub last_valid_time: u32,
    /// Count of valid (`A`) GPRMC records.
    pub sample_count_a: u32,
    /// Count of invalid (`V`) GPRMC records.
    pub sample_count_v: u32,
    /// Count of receiver port restarts.
    pub restart_count: u32,
}

impl Diagnostics {
    /// Writes the counters into the diagnostic property.
    pub fn publish(&self) {
        props::set_u32_at(PROP_STATE_GPS_DIAGNOSTIC, 0, self.last_sample_time);
        props::set_u32_at(PROP_STATE_GPS_DIAGNOSTIC, 1, self.last_valid_time);
        props::set_u32_at(PROP_STATE_GPS_DIAGNOSTIC, 2, self.sample_count_a);
        props::set_u32_at(PROP_STATE_GPS_DIAGNOSTIC, 3, self.sample_count_v);
        props::set_u32_at(PROP_STATE_GPS_DIAGNOSTIC, 4, self.restart_count);
    }
}

/// NMEA sentence parser and fix assembler.
///
/// GPRMC and GPGGA may arrive in either order; the in-progress fix is
/// upgraded rather than cleared when the new sentence's fix time matches
/// within the merge window, and a complete fix is published only once
/// both have contributed.
pub struct NmeaParser {
    in_progress: Fix,
    last_pdop: f64,
    last_hdop: f64,
    last_vdop: f64,
    dop_timer: u32,
    /// Health counters.
    pub diag: Diagnostics,
}

impl NmeaParser {
    /// Creates an empty parser.
    pub fn new() -> NmeaParser {
        NmeaParser {
            in_progress: Fix::default(),
            last_pdop: 0.0,
            last_hdop: 0.0,
            last_vdop: 0.0,
            dop_timer: 0,
            diag: Diagnostics::default(),
        }
    }

    /// Parses one sentence. `now` is the current UTC time in seconds,
    /// used for freshness timers and to date GPGGA times. Returns a
    /// newly completed fix when the sentence finished one.
    pub fn parse(&mut self, line: &str, now: u32) -> Option<Fix> {
        let line = line.trim();
        if !line.starts_with("$GP") {
            return None;
        }

        // checksum: XOR of the bytes between '$' and '*'
        if !crate::codec::checksum_trailer_ok(&line[1..]) {
            warn!("GPS record failed checksum: {line}");
            return None;
        }
        let body = &line[1..line.rfind('*').unwrap_or(line.len())];
        let fields: Vec<&str> = body.split(',').collect();

        match fields[0] {
            "GPRMC" => self.parse_rmc(&fields, now),
            "GPGGA" => self.parse_gga(&fields, now),
            "GPGSA" => self.parse_gsa(&fields, now),
            _ => None,
        }
    }

    fn parse_rmc(&mut self, fields: &[&str], now: u32) -> Option<Fix> {
        if fields.len() < 10 {
            return None;
        }
        let status = match fields[2].parse::<FixStatus>() {
            Ok(status) => status,
            Err(e) => {
                warn!("$GPRMC rejected: {e}");
                return None;
            }
        };
        if status == FixStatus::Void {
            // no valid fix acquired
            self.diag.sample_count_v += 1;
            if self.diag.last_sample_time == 0 {
                info!("First $GPRMC record ({status})");
            }
            self.diag.last_sample_time = now;
            return None;
        }

        let hms = parse_clock(fields[1]);
        let dmy = fields[9].parse::<u32>().unwrap_or(0);
        let fixtime = utc_seconds(dmy, hms, now);
        let latitude = parse_latitude(fields[3], fields[4]);
        let longitude = parse_longitude(fields[5], fields[6]);
        let knots = fields[7].parse::<f64>().unwrap_or(-1.0);
        let heading = fields[8].parse::<f64>().unwrap_or(-1.0);
        let speed_kph = if knots >= 0.0 {
            knots * KILOMETERS_PER_KNOT
        } else {
            -1.0
        };

        // expire unrefreshed DOPs
        if self.dop_timer != 0 && now.saturating_sub(self.dop_timer) > DOP_DECAY {
            self.last_pdop = 0.0;
            self.last_hdop = 0.0;
            self.last_vdop = 0.0;
        }

        self.diag.sample_count_a += 1;
        if self.diag.last_sample_time == 0 {
            info!("First $GPRMC record (A) @{fixtime}");
        }
        self.diag.last_sample_time = now;

        if fixtime < MIN_CLOCK_TIME {
            error!("$GPRMC invalid fixtime: {fixtime}");
            return None;
        }
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            warn!("$GPRMC unparsable lat/lon");
            return None;
        };
        if latitude >= 90.0 || latitude <= -90.0 || longitude >= 180.0 || longitude <= -180.0 {
            warn!("$GPRMC invalid lat/lon: {latitude:.5}/{longitude:.5}");
            return None;
        }

        // If the GPGGA came first, upgrade the in-progress fix rather
        // than clearing it; clear on a time regression, an expired
        // window, or moved coordinates.
        let cur = &self.in_progress;
        if cur.nmea.is_empty()
            || cur.fixtime < MIN_CLOCK_TIME
            || cur.fixtime > fixtime
            || fixtime - cur.fixtime > MERGE_WINDOW
            || cur.point.latitude != latitude
            || cur.point.longitude != longitude
        {
            self.in_progress = Fix {
                fix_quality: 1,
                ..Fix::default()
            };
        }
        let fix = &mut self.in_progress;
        fix.age_timer = now;
        fix.fixtime = fixtime;
        fix.speed_kph = speed_kph;
        fix.heading = heading;
        fix.point = GeoPoint::new(latitude, longitude);
        fix.pdop = self.last_pdop;
        fix.hdop = self.last_hdop;
        fix.vdop = self.last_vdop;
        fix.nmea |= NmeaMask::GPRMC;

        self.diag.last_valid_time = now;
        sync_system_clock(fixtime, now);

        if fix.nmea.contains(NmeaMask::GPGGA) {
            Some(*fix)
        } else {
            None
        }
    }

    fn parse_gga(&mut self, fields: &[&str], now: u32) -> Option<Fix> {
        if fields.len() < 10 || fields[6] == "0" || fields[6].is_empty() {
            return None;
        }

        let hms = parse_clock(fields[1]);
        let fixtime = utc_seconds(0, hms, now);
        let latitude = parse_latitude(fields[2], fields[3]);
        let longitude = parse_longitude(fields[4], fields[5]);
        let fix_quality = fields[6].parse::<u16>().unwrap_or(1);
        let hdop = fields[8].parse::<f64>().unwrap_or(0.0);
        let altitude = fields[9].parse::<f64>().unwrap_or(0.0);

        // PDOP/VDOP decay; the HDOP in this sentence restarts the timer
        if self.dop_timer != 0 && now.saturating_sub(self.dop_timer) > DOP_DECAY {
            self.last_pdop = 0.0;
            self.last_vdop = 0.0;
        }
        self.last_hdop = hdop;
        self.dop_timer = now;

        if fixtime < MIN_CLOCK_TIME {
            debug!("$GPGGA invalid fixtime: {fixtime}");
            return None;
        }
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            return None;
        };
        if latitude >= 90.0 || latitude <= -90.0 || longitude >= 180.0 || longitude <= -180.0 {
            warn!("$GPGGA invalid lat/lon: {latitude:.5}/{longitude:.5}");
            return None;
        }

        // If the GPRMC came first, upgrade rather than clear. Moved
        // coordinates are tolerated here; the RMC position wins.
        let cur = &self.in_progress;
        if cur.nmea.is_empty()
            || cur.fixtime < MIN_CLOCK_TIME
            || cur.fixtime > fixtime
            || fixtime - cur.fixtime > MERGE_WINDOW
        {
            self.in_progress = Fix::default();
        }
        let fix = &mut self.in_progress;
        fix.age_timer = now;
        fix.fixtime = fixtime;
        fix.altitude = altitude;
        if !fix.nmea.contains(NmeaMask::GPRMC) {
            fix.point = GeoPoint::new(latitude, longitude);
        }
        fix.fix_quality = fix_quality;
        fix.pdop = self.last_pdop;
        fix.hdop = self.last_hdop;
        fix.vdop = self.last_vdop;
        fix.nmea |= NmeaMask::GPGGA;

        self.diag.last_valid_time = now;

        if fix.nmea.contains(NmeaMask::GPRMC) {
            Some(*fix)
        } else {
            None
        }
    }

    fn parse_gsa(&mut self, fields: &[&str], now: u32) -> Option<Fix> {
        if fields.len() < 18 {
            return None;
        }
        // DOPs are taken from every GSA sentence regardless of the
        // reported fix mode.
        self.last_pdop = fields[15].parse().unwrap_or(0.0);
        self.last_hdop = fields[16].parse().unwrap_or(0.0);
        self.last_vdop = fields[17].parse().unwrap_or(0.0);
        self.dop_timer = now;

        let fix = &mut self.in_progress;
        fix.pdop = self.last_pdop;
        fix.hdop = self.last_hdop;
        fix.vdop = self.last_vdop;
        fix.nmea |= NmeaMask::GPGSA;
        None
    }
}

impl Default for NmeaParser {
    fn default() -> NmeaParser {
        NmeaParser::new()
    }
}

/// Parses HHMMSS(.sss) into an integer HHMMSS.
fn parse_clock(field: &str) -> u32 {
    field
        .split('.')
        .next()
        .and_then(|f| f.parse().ok())
        .unwrap_or(0)
}

/// Converts DDMMYY + HHMMSS to UTC seconds, 0 when unrepresentable.
/// When `dmy` is zero the date is borrowed from `now`.
fn utc_seconds(dmy: u32, hms: u32, now: u32) -> u32 {
    fn build(dmy: u32, hms: u32, now: u32) -> Option<i64> {
        let (hour, min, sec) = (hms / 10_000, (hms / 100) % 100, hms % 100);
        let date = if dmy > 0 {
            NaiveDate::from_ymd_opt(2000 + (dmy % 100) as i32, (dmy / 100) % 100, dmy / 10_000)?
        } else {
            let today = Utc.timestamp_opt(i64::from(now), 0).single()?;
            NaiveDate::from_ymd_opt(today.year(), today.month(), today.day())?
        };
        let stamp = date.and_hms_opt(hour, min, sec)?;
        Some(Utc.from_utc_datetime(&stamp).timestamp())
    }
    build(dmy, hms, now)
        .and_then(|s| u32::try_from(s).ok())
        .unwrap_or(0)
}

/// Parses `ddmm.mmmm` + hemisphere into degrees.
fn parse_latitude(field: &str, hemi: &str) -> Option<f64> {
    let raw: f64 = field.parse().ok()?;
    let deg = (raw / 100.0).floor();
    let min = raw - deg * 100.0;
    let val = deg + min / 60.0;
    Some(if hemi.eq_ignore_ascii_case("S") {
        -val
    } else {
        val
    })
}

/// Parses `dddmm.mmmm` + hemisphere into degrees.
fn parse_longitude(field: &str, hemi: &str) -> Option<f64> {
    let raw: f64 = field.parse().ok()?;
    let deg = (raw / 100.0).floor();
    let min = raw - deg * 100.0;
    let val = deg + min / 60.0;
    Some(if hemi.eq_ignore_ascii_case("W") {
        -val
    } else {
        val
    })
}

/// Flags a system-clock adjustment when the fix time and system time
/// diverge past the configured threshold (floor 5 s). Actually stepping
/// the clock is platform-specific; the divergence is logged for the host
/// shell to act on.
fn sync_system_clock(fixtime: u32, now: u32) {
    let threshold = props::get_u32(PROP_GPS_CLOCK_DELTA, 15).max(5);
    let delta = fixtime.abs_diff(now);
    if delta >= threshold {
        warn!("System clock differs from GPS time by {delta} s");
    }
}

/// Shared GPS state: the latest complete fix plus the staleness flag.
/// Readers always see a coherent snapshot.
pub struct GpsMonitor {
    state: Mutex<MonitorState>,
    cond: Condvar,
}

struct MonitorState {
    latest: Option<Fix>,
    stale: bool,
}

/// GPS data for concurrent access.
pub static GPS: Lazy<GpsMonitor> = Lazy::new(|| GpsMonitor {
    state: Mutex::new(MonitorState {
        latest: None,
        stale: false,
    }),
    cond: Condvar::new(),
});

impl GpsMonitor {
    /// Publishes a freshly completed fix.
    pub fn publish(&self, fix: Fix) {
        let mut st = self.state.lock().unwrap();
        st.latest = Some(fix);
        self.cond.notify_all();
    }

    /// Returns a copy of the latest fix.
    pub fn latest(&self) -> Option<Fix> {
        self.state.lock().unwrap().latest
    }

    /// Returns the latest fix, waiting up to `timeout_secs` for a newer
    /// one when a timeout is given.
    pub fn acquire(&self, timeout_secs: u32) -> Option<Fix> {
        let st = self.state.lock().unwrap();
        if timeout_secs == 0 {
            return st.latest;
        }
        let before = st.latest.map(|f| f.fixtime);
        let (st, _timed_out) = self
            .cond
            .wait_timeout_while(st, Duration::from_secs(u64::from(timeout_secs)), |st| {
                st.latest.map(|f| f.fixtime) == before
            })
            .unwrap();
        st.latest
    }

    /// Drives the freshness state machine from the main loop.
    pub fn set_stale(&self, stale: bool) {
        self.state.lock().unwrap().stale = stale;
    }

    /// Checks the freshness state.
    pub fn is_stale(&self) -> bool {
        self.state.lock().unwrap().stale
    }
}

fn now_utc() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Reads one CR/LF terminated line. Returns `Ok(None)` on a read timeout
/// and `Err` when the port reaches EOF or fails.
fn read_line<R: Read + ?Sized>(
    port: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<String>, error::Gps> {
    buf.clear();
    loop {
        let mut byte = [0u8];
        match port.read(&mut byte) {
            Ok(0) => return Err(error::Gps::SerialEnd),
            Ok(_) => match byte[0] {
                b'\r' => {}
                b'\n' => {
                    return Ok(Some(String::from_utf8_lossy(buf).into_owned()));
                }
                b => {
                    if buf.len() < 256 {
                        buf.push(b);
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Opens the receiver serial port.
fn open_port(port_name: &str, baud: u32) -> Result<Box<dyn tokio_serial::SerialPort>, error::Gps> {
    tokio_serial::new(port_name, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| {
            debug!("Serial open failed: {e}");
            error::Gps::Open {
                port: port_name.to_owned(),
            }
        })
}

/// Spawns the GPS reader task: opens the configured port, feeds the
/// parser, publishes completed fixes, and restarts the port when the
/// receiver goes quiet.
pub fn spawn_reader(run: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("gps-reader".into())
        .spawn(move || reader_main(&run))
}

fn reader_main(run: &AtomicBool) {
    let mut parser = NmeaParser::new();
    while run.load(Ordering::SeqCst) {
        let port_name = props::get_string(PROP_CFG_GPS_PORT, "");
        let baud = props::get_u32(PROP_CFG_GPS_BPS, 4800);
        if port_name.is_empty() {
            warn!("GPS port not configured");
            thread::sleep(Duration::from_secs(30));
            continue;
        }

        info!("Starting GPS serial connection on {port_name}");
        let mut port = match open_port(&port_name, baud) {
            Ok(p) => p,
            Err(e) => {
                error!("{e}");
                parser.diag.restart_count += 1;
                parser.diag.publish();
                thread::sleep(Duration::from_secs(10));
                continue;
            }
        };

        let mut buf = Vec::with_capacity(128);
        let mut quiet_secs = 0u32;
        while run.load(Ordering::SeqCst) {
            let now = now_utc();
            match read_line(&mut *port, &mut buf) {
                Ok(Some(line)) => {
                    if let Some(fix) = parser.parse(&line, now) {
                        GPS.publish(fix.apply_minimums());
                        parser.diag.publish();
                    }
                    // watchdog: restart the port when the receiver sends
                    // nothing RMC-shaped for too long
                    if parser.diag.last_sample_time != 0 {
                        quiet_secs = now.saturating_sub(parser.diag.last_sample_time);
                    }
                    if quiet_secs > GPS_EVENT_INTERVAL {
                        error!("Lost GPS communication, restarting port");
                        break;
                    }
                }
                Ok(None) => {
                    quiet_secs = quiet_secs.saturating_add(READ_TIMEOUT.as_secs() as u32);
                    if quiet_secs > GPS_EVENT_INTERVAL {
                        error!("No GPS communication, restarting port");
                        break;
                    }
                }
                Err(e) => {
                    warn!("GPS read error: {e}");
                    break;
                }
            }
        }

        parser.diag.restart_count += 1;
        parser.diag.publish();
    }
    info!("GPS reader stopping");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let sum = crate::codec::xor_checksum(body.as_bytes());
        format!("${body}*{sum:02X}")
    }

    const NOW: u32 = 1_116_554_000; // within a day of the sample fixes

    #[test]
    fn rmc_then_gga_publishes_once() {
        let mut p = NmeaParser::new();
        let rmc = with_checksum("GPRMC,025423.494,A,3709.0642,N,11907.8315,W,0.094824,108.52,200505,,");
        let gga = with_checksum("GPGGA,025425.494,3709.0743,N,11907.6314,W,1,04,2.3,530.3,M,-21.9,M,0.0,0000");

        assert!(p.parse(&rmc, NOW).is_none());
        let fix = p.parse(&gga, NOW).expect("complete fix");
        assert!(fix.nmea.contains(NmeaMask::GPRMC | NmeaMask::GPGGA));
        assert!((fix.point.latitude - 37.151_07).abs() < 1e-4);
        assert!((fix.point.longitude + 119.130_525).abs() < 1e-4);
        assert!((fix.altitude - 530.3).abs() < 1e-9);
        assert!((fix.hdop - 2.3).abs() < 1e-9);
        assert_eq!(p.diag.sample_count_a, 1);
    }

    #[test]
    fn gga_then_rmc_merges() {
        let mut p = NmeaParser::new();
        let gga = with_checksum("GPGGA,025423.494,3709.0642,N,11907.8315,W,1,04,2.3,530.3,M,-21.9,M,0.0,0000");
        let rmc = with_checksum("GPRMC,025423.494,A,3709.0642,N,11907.8315,W,0.094824,108.52,200505,,");

        assert!(p.parse(&gga, NOW).is_none());
        let fix = p.parse(&rmc, NOW).expect("complete fix");
        assert!((fix.altitude - 530.3).abs() < 1e-9);
        assert!(fix.speed_kph >= 0.0);
        assert!((fix.speed_kph - 0.094_824 * 1.852).abs() < 1e-6);
    }

    /// A tampered byte between `$` and `*` must be rejected.
    #[test]
    fn tampered_sentence_rejected() {
        let mut p = NmeaParser::new();
        let good = with_checksum("GPRMC,025423.494,A,3709.0642,N,11907.8315,W,0.094824,108.52,200505,,");
        let bad = good.replacen("3709", "3808", 1);
        assert!(p.parse(&bad, NOW).is_none());
        assert_eq!(p.diag.sample_count_a, 0);
    }

    /// Checks the fix status from string conversion.
    #[test]
    fn fix_status_from_str() {
        assert_eq!("A".parse::<FixStatus>().unwrap(), FixStatus::Active);
        assert_eq!("V".parse::<FixStatus>().unwrap(), FixStatus::Void);

        // Check errors.
        assert!("".parse::<FixStatus>().is_err());
        assert!("invalid".parse::<FixStatus>().is_err());
        assert!("a".parse::<FixStatus>().is_err());
    }

    /// Checks the fix status to string conversion.
    #[test]
    fn fix_status_display() {
        assert_eq!(format!("{}", FixStatus::Active), "A");
        assert_eq!(format!("{}", FixStatus::Void), "V");
    }

    /// A GPRMC with an unknown status letter is rejected without
    /// touching the sample counters.
    #[test]
    fn invalid_status_rejected() {
        let mut p = NmeaParser::new();
        let rmc = with_checksum("GPRMC,015402.240,X,3709.0642,N,11907.8315,W,0.0,0.0,200505,,");
        assert!(p.parse(&rmc, NOW).is_none());
        assert_eq!(p.diag.sample_count_a, 0);
        assert_eq!(p.diag.sample_count_v, 0);
    }

    #[test]
    fn void_fix_counts_v() {
        let mut p = NmeaParser::new();
        let rmc = with_checksum("GPRMC,015402.240,V,36000.0000,N,72000.0000,E,0.000000,,200505,,");
        assert!(p.parse(&rmc, NOW).is_none());
        assert_eq!(p.diag.sample_count_v, 1);
        assert_eq!(p.diag.sample_count_a, 0);
    }

    /// Out-of-range coordinates are rejected even with a valid checksum.
    #[test]
    fn out_of_range_rejected() {
        let mut p = NmeaParser::new();
        let rmc = with_checksum("GPRMC,015402.240,A,9600.0000,N,11907.8315,W,0.0,0.0,200505,,");
        assert!(p.parse(&rmc, NOW).is_none());
    }

    #[test]
    fn gsa_contributes_dops() {
        let mut p = NmeaParser::new();
        let gsa = with_checksum("GPGSA,A,3,16,20,13,23,,,,,,,,,4.3,2.3,3.7");
        let rmc = with_checksum("GPRMC,025423.494,A,3709.0642,N,11907.8315,W,0.094824,108.52,200505,,");
        let gga = with_checksum("GPGGA,025423.494,3709.0642,N,11907.8315,W,1,04,2.3,530.3,M,-21.9,M,0.0,0000");

        assert!(p.parse(&gsa, NOW).is_none());
        assert!(p.parse(&rmc, NOW).is_none());
        let fix = p.parse(&gga, NOW).unwrap();
        assert!((fix.pdop - 4.3).abs() < 1e-9);
        assert!((fix.vdop - 3.7).abs() < 1e-9);
    }

    #[test]
    fn fixtime_parsing() {
        // 2005-05-20 02:54:23 UTC
        let t = utc_seconds(200505, 25423, NOW);
        let dt = Utc.timestamp_opt(i64::from(t), 0).unwrap();
        assert_eq!(
            (dt.year(), dt.month(), dt.day()),
            (2005, 5, 20)
        );
        // GGA borrows the date from 'now'
        let t2 = utc_seconds(0, 25423, t);
        assert_eq!(t2, t);
    }

    #[test]
    fn coordinate_parsing() {
        let lat = parse_latitude("3709.0642", "N").unwrap();
        assert!((lat - (37.0 + 9.0642 / 60.0)).abs() < 1e-9);
        let lat = parse_latitude("3709.0642", "S").unwrap();
        assert!(lat < 0.0);
        let lon = parse_longitude("11907.8315", "W").unwrap();
        assert!((lon + (119.0 + 7.8315 / 60.0)).abs() < 1e-9);
        assert!(parse_latitude("", "N").is_none());
    }

    #[test]
    fn monitor_snapshot() {
        let monitor = GpsMonitor {
            state: Mutex::new(MonitorState {
                latest: None,
                stale: false,
            }),
            cond: Condvar::new(),
        };
        assert!(monitor.latest().is_none());
        let fix = Fix {
            point: GeoPoint::new(37.0, -122.0),
            fixtime: NOW,
            ..Fix::default()
        };
        monitor.publish(fix);
        let copy = monitor.latest().unwrap();
        assert_eq!(copy.fixtime, NOW);
        monitor.set_stale(true);
        assert!(monitor.is_stale());
    }
}
