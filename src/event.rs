//! Event records and field definitions.
//!
//! An [`Event`] groups everything a field encoder may need; unused fields
//! keep their "undefined" defaults. A custom packet format is an ordered
//! list of [`FieldDef`]s, each packable into 24 bits for on-the-wire
//! format declarations.

use crate::geo::GeoPoint;
use crate::status::StatusCode;

/// Maximum length of entity/string identifier fields.
pub const MAX_ID_SIZE: usize = 20;

/// Low-resolution quantization marker.
pub const LO_RES: bool = false;
/// High-resolution quantization marker.
pub const HI_RES: bool = true;

/// Event field types. Comments give lo-res / hi-res wire widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// %2x status code.
    StatusCode = 0x01,
    /// %4u UTC seconds.
    Timestamp = 0x02,
    /// %4u generic index.
    Index = 0x03,
    /// %1x / %2x packet sequence.
    Sequence = 0x04,
    /// %6g / %8g packed GPS point.
    GpsPoint = 0x06,
    /// %2u fix age, seconds.
    GpsAge = 0x07,
    /// %1u kph / %2u 0.1 kph.
    Speed = 0x08,
    /// %1x 360/255 units / %2u 0.01 deg.
    Heading = 0x09,
    /// %2i meters / %3i 0.1 meters.
    Altitude = 0x0A,
    /// %3u km / %4u 0.1 km.
    Distance = 0x0B,
    /// %3u km / %4u 0.1 km.
    Odometer = 0x0C,
    /// %4x geofence ID.
    GeofenceId = 0x0E,
    /// %1u kph / %2u 0.1 kph.
    TopSpeed = 0x0F,
    /// %*s string (NUL-terminated when shorter than the field).
    String = 0x11,
    /// %*s string, NUL-padded to the field width.
    StringPad = 0x12,
    /// %*s entity string.
    Entity = 0x15,
    /// %*s entity string, NUL-padded.
    EntityPad = 0x16,
    /// %*b binary, zero-padded.
    Binary = 0x1A,
    /// %4x digital input ID.
    InputId = 0x21,
    /// %4x digital input state.
    InputState = 0x22,
    /// %4x digital output ID.
    OutputId = 0x24,
    /// %4x digital output state.
    OutputState = 0x25,
    /// %4u elapsed seconds.
    ElapsedTime = 0x27,
    /// %4u counter.
    Counter = 0x28,
    /// %4u analog sensor low.
    Sensor32Low = 0x31,
    /// %4u analog sensor high.
    Sensor32High = 0x32,
    /// %4u analog sensor average.
    Sensor32Average = 0x33,
    /// %1i C / %2i 0.1 C.
    TempLow = 0x3A,
    /// %1i C / %2i 0.1 C.
    TempHigh = 0x3B,
    /// %1i C / %2i 0.1 C.
    TempAverage = 0x3C,
    /// %2u seconds since last DGPS update.
    GpsDgpsUpdate = 0x41,
    /// %1u m / %2u 0.1 m.
    GpsHorzAccuracy = 0x42,
    /// %1u m / %2u 0.1 m.
    GpsVertAccuracy = 0x43,
    /// %1u satellite count.
    GpsSatellites = 0x44,
    /// %2i 0.01 deg magnetic variation.
    GpsMagVariation = 0x45,
    /// %1u fix quality.
    GpsQuality = 0x46,
    /// %1u 2D/3D type.
    GpsType = 0x47,
    /// %1i m / %2i 0.1 m geoid height.
    GpsGeoidHeight = 0x48,
    /// %1u 0.1 units, 25.5 cap.
    GpsPdop = 0x49,
    /// %1u 0.1 units, 25.5 cap.
    GpsHdop = 0x4A,
    /// %1u 0.1 units, 25.5 cap.
    GpsVdop = 0x4B,
    /// %*b MID/PID frame (at least 4 bytes).
    ObcValue = 0x50,
    /// %4u generic OBC value.
    ObcGeneric = 0x51,
    /// %4x J1708 fault code.
    ObcJ1708Fault = 0x52,
    /// %3u km / %4u 0.1 km.
    ObcDistance = 0x54,
    /// %3u 0.1 hours.
    ObcEngineHours = 0x57,
    /// %2u rpm.
    ObcEngineRpm = 0x58,
    /// %1i C / %2i 0.1 C.
    ObcCoolantTemp = 0x59,
    /// %1u percent / %2u 0.1 percent.
    ObcCoolantLevel = 0x5A,
    /// %1u percent / %2u 0.1 percent.
    ObcOilLevel = 0x5B,
    /// %1u kPa / %2u 0.1 kPa.
    ObcOilPressure = 0x5C,
    /// %1u percent / %2u 0.1 percent.
    ObcFuelLevel = 0x5D,
    /// %1u kpl / %2u 0.1 kpl.
    ObcFuelEconomy = 0x5E,
    /// %3u liters / %4u 0.1 liters.
    ObcFuelUsed = 0x5F,
}

/// One field of a custom packet format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Field type.
    pub field_type: FieldType,
    /// High-resolution quantization flag.
    pub hi_res: bool,
    /// Index into the event's array for indexed fields.
    pub index: u8,
    /// Field byte width on the wire.
    pub length: u8,
}

impl FieldDef {
    /// Creates a field definition.
    pub const fn new(field_type: FieldType, hi_res: bool, index: u8, length: u8) -> FieldDef {
        FieldDef {
            field_type,
            hi_res,
            index,
            length,
        }
    }

    /// Packs the definition into 24 bits:
    /// `bit 23: hi-res | bits 22..16: type | bits 15..8: index | bits 7..0: length`.
    pub fn pack24(&self) -> u32 {
        (u32::from(self.hi_res) << 23)
            | (u32::from(self.field_type as u8 & 0x7F) << 16)
            | (u32::from(self.index) << 8)
            | u32::from(self.length)
    }
}

/// An OBC (J1708) MID/PID value frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObcValue {
    /// Message ID (128 = engine, 130 = transmission, 136 = brakes).
    pub mid: u16,
    /// Parameter ID.
    pub pid: u16,
    /// Valid bytes in `data`.
    pub data_len: u8,
    /// Raw parameter bytes.
    pub data: [u8; 27],
}

/// A structured record describing a detected condition, ready for field
/// encoding. Unused fields carry their "undefined" defaults.
#[derive(Debug, Clone)]
pub struct Event {
    /// Status code for the occurrence.
    pub status_code: StatusCode,
    /// Timestamp, UTC seconds.
    pub timestamp: u32,
    /// Generic index value.
    pub index: u32,

    /// Up to two GPS points (second used by swept formats).
    pub gps_point: [GeoPoint; 2],
    /// Age of the fix at event time, seconds.
    pub gps_age: u32,
    /// Speed, kph.
    pub speed_kph: f64,
    /// Heading, degrees.
    pub heading: f64,
    /// Altitude, meters.
    pub altitude: f64,
    /// Trip distance, km.
    pub distance_km: f64,
    /// Total odometer, km.
    pub odometer_km: f64,

    /// Up to two geofence IDs.
    pub geofence_id: [u32; 2],
    /// Top speed over the reporting interval, kph.
    pub top_speed_kph: f64,

    /// Entity identifier strings.
    pub entity: [String; 2],
    /// Generic strings.
    pub string: [String; 2],
    /// Generic binary blob.
    pub binary: Vec<u8>,

    /// Digital input ID.
    pub input_id: u32,
    /// Digital input state bits.
    pub input_state: u32,
    /// Digital output ID.
    pub output_id: u32,
    /// Digital output state bits.
    pub output_state: u32,
    /// Elapsed-time counters, seconds.
    pub elapsed_time_sec: [u32; 8],
    /// Generic counter.
    pub counter: u32,

    /// Analog sensor lows.
    pub sensor32_lo: [u32; 1],
    /// Analog sensor highs.
    pub sensor32_hi: [u32; 1],
    /// Analog sensor averages.
    pub sensor32_av: [u32; 1],

    /// Temperature channel lows, C.
    pub temp_lo: [f64; 4],
    /// Temperature channel highs, C.
    pub temp_hi: [f64; 4],
    /// Temperature channel averages, C.
    pub temp_av: [f64; 4],

    /// Seconds since last DGPS update.
    pub gps_dgps_update: u32,
    /// Horizontal accuracy, meters.
    pub gps_horz_accuracy: f64,
    /// Vertical accuracy, meters.
    pub gps_vert_accuracy: f64,
    /// Satellites in the fix.
    pub gps_satellites: u32,
    /// Magnetic variation, degrees.
    pub gps_mag_variation: f64,
    /// Fix quality (1 = GPS, 2 = DGPS).
    pub gps_quality: u32,
    /// 2D/3D fix type.
    pub gps_2d3d: u32,
    /// Geoid height, meters.
    pub gps_geoid_height: f64,
    /// Position dilution of precision.
    pub gps_pdop: f64,
    /// Horizontal dilution of precision.
    pub gps_hdop: f64,
    /// Vertical dilution of precision.
    pub gps_vdop: f64,

    /// OBC MID/PID value frames.
    pub obc_value: [ObcValue; 10],
    /// OBC generic values.
    pub obc_generic: [u32; 10],
    /// OBC J1708 fault codes.
    pub obc_j1708_fault: [u32; 2],
    /// OBC-reported distance, km.
    pub obc_distance_km: f64,
    /// Engine hours.
    pub obc_engine_hours: f64,
    /// Engine RPM.
    pub obc_engine_rpm: u32,
    /// Coolant temperature, C.
    pub obc_coolant_temp: f64,
    /// Coolant level, fraction 0..1.
    pub obc_coolant_level: f64,
    /// Oil level, fraction 0..1.
    pub obc_oil_level: f64,
    /// Oil pressure, kPa.
    pub obc_oil_pressure: f64,
    /// Fuel level, fraction 0..1.
    pub obc_fuel_level: f64,
    /// Instantaneous fuel economy, kpl.
    pub obc_fuel_economy: f64,
    /// Average fuel economy, kpl (preferred over instantaneous).
    pub obc_avg_fuel_econ: f64,
    /// Fuel used, liters.
    pub obc_fuel_used: f64,
}

impl Default for Event {
    fn default() -> Event {
        Event {
            status_code: crate::status::STATUS_NONE,
            timestamp: 0,
            index: 0,
            gps_point: [GeoPoint::default(); 2],
            gps_age: 0,
            speed_kph: 0.0,
            heading: 0.0,
            altitude: 0.0,
            distance_km: 0.0,
            odometer_km: 0.0,
            geofence_id: [0; 2],
            top_speed_kph: 0.0,
            entity: [String::new(), String::new()],
            string: [String::new(), String::new()],
            binary: Vec::new(),
            input_id: 0,
            input_state: 0,
            output_id: 0,
            output_state: 0,
            elapsed_time_sec: [0; 8],
            counter: 0,
            sensor32_lo: [0; 1],
            sensor32_hi: [0; 1],
            sensor32_av: [0; 1],
            temp_lo: [0.0; 4],
            temp_hi: [0.0; 4],
            temp_av: [0.0; 4],
            gps_dgps_update: 0,
            gps_horz_accuracy: 0.0,
            gps_vert_accuracy: 0.0,
            gps_satellites: 0,
            gps_mag_variation: 0.0,
            gps_quality: 0,
            gps_2d3d: 0,
            gps_geoid_height: 0.0,
            gps_pdop: 0.0,
            gps_hdop: 0.0,
            gps_vdop: 0.0,
            obc_value: [ObcValue::default(); 10],
            obc_generic: [0; 10],
            obc_j1708_fault: [0; 2],
            obc_distance_km: 0.0,
            obc_engine_hours: 0.0,
            obc_engine_rpm: 0,
            obc_coolant_temp: 0.0,
            obc_coolant_level: 0.0,
            obc_oil_level: 0.0,
            obc_oil_pressure: 0.0,
            obc_fuel_level: 0.0,
            obc_fuel_economy: 0.0,
            obc_avg_fuel_econ: 0.0,
            obc_fuel_used: 0.0,
        }
    }
}

impl Event {
    /// Creates an event with status, timestamp and the GPS data of a fix.
    pub fn with_fix(code: StatusCode, timestamp: u32, fix: &crate::gps::Fix) -> Event {
        let mut ev = Event {
            status_code: code,
            timestamp,
            ..Event::default()
        };
        ev.set_gps(fix);
        ev
    }

    /// Copies the GPS data of a fix into the event. A zero event timestamp
    /// is replaced with the fix time.
    pub fn set_gps(&mut self, fix: &crate::gps::Fix) {
        if self.timestamp == 0 {
            self.timestamp = fix.fixtime;
        }
        self.gps_point[0] = fix.point;
        self.speed_kph = fix.speed_kph.max(0.0);
        self.heading = fix.heading.max(0.0);
        self.altitude = fix.altitude;
        self.gps_quality = u32::from(fix.fix_quality);
        self.gps_pdop = fix.pdop;
        self.gps_hdop = fix.hdop;
        self.gps_vdop = fix.vdop;
        self.gps_horz_accuracy = fix.accuracy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Layout check:
    /// `bit 23: hi-res | 22..16: type | 15..8: index | 7..0: length`.
    #[test]
    fn field_def_packs_to_24_bits() {
        let fd = FieldDef::new(FieldType::GpsPoint, HI_RES, 0, 8);
        assert_eq!(fd.pack24(), 0x0086_0008);

        let fd = FieldDef::new(FieldType::StatusCode, LO_RES, 0, 2);
        assert_eq!(fd.pack24(), 0x0001_0002);

        let fd = FieldDef::new(FieldType::TempLow, HI_RES, 3, 2);
        assert_eq!(fd.pack24(), 0x00BA_0302);
    }

    #[test]
    fn default_event_is_undefined() {
        let ev = Event::default();
        assert_eq!(ev.status_code, crate::status::STATUS_NONE);
        assert!(!ev.gps_point[0].is_valid());
        assert_eq!(ev.geofence_id, [0, 0]);
    }
}
