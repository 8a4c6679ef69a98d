//! Event manager: field-table packet encoding and the event queue.
//!
//! Encoding is table-driven: a packet format is a list of [`FieldDef`]s,
//! and the encoder walks the list emitting each field at its exact wire
//! width. Two fixed formats (standard and high resolution) are always
//! known; custom formats can be registered and are declared to the server
//! with a format-definition packet.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::error;

use crate::codec::{self, round};
use crate::event::{Event, FieldDef, FieldType, HI_RES, LO_RES};
use crate::geo::GeoPoint;
use crate::packet::{
    sequence_mask, Packet, Priority, PKT_CLIENT_FIXED_FMT_HIGH, PKT_CLIENT_FIXED_FMT_STD,
    PKT_CLIENT_FORMAT_DEF_24, SEQUENCE_ALL,
};
use crate::queue::PacketQueue;

/// Capacity of the event queue, in packets.
pub const EVENT_QUEUE_SIZE: usize = 100;

/// Packet format the rule engines encode events with.
pub const DEFAULT_EVENT_FORMAT: u8 = PKT_CLIENT_FIXED_FMT_STD;

/// Maximum number of registerable custom formats.
const CUSTOM_FORMAT_SLOTS: usize = 5;

/// Temperature saturation for 1-byte fields, in degrees C.
const TEMP_LO_RES_LIMIT: i64 = 126;
/// Temperature saturation for wider fields, in 0.1 degrees C.
const TEMP_HI_RES_LIMIT: i64 = 32766;

/// The process-wide event queue.
pub static EVENT_QUEUE: Lazy<PacketQueue> = Lazy::new(|| PacketQueue::new(EVENT_QUEUE_SIZE));

static EVENT_SEQUENCE: Mutex<u32> = Mutex::new(0);
static TOTAL_PACKET_COUNT: AtomicU32 = AtomicU32::new(0);

/// Callback used by the rule engines to enqueue an event.
pub type EventAddFn = std::sync::Arc<dyn Fn(Priority, u8, &Event) -> bool + Send + Sync>;

/// A custom packet format: a client packet type plus its field list.
#[derive(Debug, Clone)]
pub struct CustomFormat {
    /// Client packet type this format encodes.
    pub pkt_type: u8,
    /// Fields in transmission order.
    pub fields: Vec<FieldDef>,
}

/// Standard-resolution fixed event format (type 0x30).
pub static FIXED_FORMAT_STD: Lazy<CustomFormat> = Lazy::new(|| CustomFormat {
    pkt_type: PKT_CLIENT_FIXED_FMT_STD,
    fields: vec![
        FieldDef::new(FieldType::StatusCode, LO_RES, 0, 2),
        FieldDef::new(FieldType::Timestamp, LO_RES, 0, 4),
        FieldDef::new(FieldType::GpsPoint, LO_RES, 0, 6),
        FieldDef::new(FieldType::Speed, LO_RES, 0, 1),
        FieldDef::new(FieldType::Heading, LO_RES, 0, 1),
        FieldDef::new(FieldType::Altitude, LO_RES, 0, 2),
        FieldDef::new(FieldType::Distance, LO_RES, 0, 3),
        FieldDef::new(FieldType::Sequence, LO_RES, 0, 1),
    ],
});

/// High-resolution fixed event format (type 0x31).
pub static FIXED_FORMAT_HIGH: Lazy<CustomFormat> = Lazy::new(|| CustomFormat {
    pkt_type: PKT_CLIENT_FIXED_FMT_HIGH,
    fields: vec![
        FieldDef::new(FieldType::StatusCode, HI_RES, 0, 2),
        FieldDef::new(FieldType::Timestamp, HI_RES, 0, 4),
        FieldDef::new(FieldType::GpsPoint, HI_RES, 0, 8),
        FieldDef::new(FieldType::Speed, HI_RES, 0, 2),
        FieldDef::new(FieldType::Heading, HI_RES, 0, 2),
        FieldDef::new(FieldType::Altitude, HI_RES, 0, 3),
        FieldDef::new(FieldType::Distance, HI_RES, 0, 3),
        FieldDef::new(FieldType::Sequence, HI_RES, 0, 1),
    ],
});

static CUSTOM_FORMATS: Lazy<Mutex<Vec<CustomFormat>>> =
    Lazy::new(|| Mutex::new(Vec::with_capacity(CUSTOM_FORMAT_SLOTS)));

/// Registers a custom format. Returns `false` when the table is full.
pub fn add_custom_format(format: CustomFormat) -> bool {
    let mut table = CUSTOM_FORMATS.lock().unwrap();
    if table.len() >= CUSTOM_FORMAT_SLOTS {
        return false;
    }
    table.retain(|f| f.pkt_type != format.pkt_type);
    table.push(format);
    true
}

/// Packet types of every registered custom format.
pub fn custom_format_types() -> Vec<u8> {
    CUSTOM_FORMATS
        .lock()
        .unwrap()
        .iter()
        .map(|f| f.pkt_type)
        .collect()
}

/// Looks up the format for a packet type (fixed formats first).
pub fn format_for_type(pkt_type: u8) -> Option<CustomFormat> {
    if pkt_type == PKT_CLIENT_FIXED_FMT_STD {
        return Some(FIXED_FORMAT_STD.clone());
    }
    if pkt_type == PKT_CLIENT_FIXED_FMT_HIGH {
        return Some(FIXED_FORMAT_HIGH.clone());
    }
    CUSTOM_FORMATS
        .lock()
        .unwrap()
        .iter()
        .find(|f| f.pkt_type == pkt_type)
        .cloned()
}

/// Builds the format-declaration packet for a custom type: one byte
/// packing the type nibble and the field-count nibble, then one 24-bit
/// descriptor per field.
pub fn format_def_packet(pkt_type: u8) -> Option<Packet> {
    let format = format_for_type(pkt_type)?;
    let mut payload = Vec::with_capacity(1 + 3 * format.fields.len());
    payload.push(((pkt_type & 0x0F) << 4) | (format.fields.len() as u8 & 0x0F));
    for field in &format.fields {
        codec::write_uint(&mut payload, field.pack24(), 3);
    }
    Some(Packet::new(PKT_CLIENT_FORMAT_DEF_24, payload))
}

fn clamp_index(ndx: u8, arity: usize) -> usize {
    (usize::from(ndx)).min(arity - 1)
}

fn write_str(out: &mut Vec<u8>, text: &str, len: usize, pad: bool) {
    let bytes = text.as_bytes();
    if bytes.len() >= len {
        out.extend_from_slice(&bytes[..len]);
    } else {
        out.extend_from_slice(bytes);
        if pad {
            out.resize(out.len() + (len - bytes.len()), 0);
        } else {
            out.push(0);
        }
    }
}

fn temp_value(celsius: f64, hi_res: bool, len: usize) -> i32 {
    let raw = if hi_res {
        round(celsius * 10.0)
    } else {
        round(celsius)
    };
    let limit = if len <= 1 {
        TEMP_LO_RES_LIMIT
    } else {
        TEMP_HI_RES_LIMIT
    };
    raw.clamp(-limit, limit) as i32
}

fn dop_value(dop: f64, len: usize) -> u32 {
    if len == 1 && dop >= 25.5 {
        255
    } else {
        round(dop * 10.0).max(0) as u32
    }
}

/// Encodes an event against a format. The sequence counter is consumed
/// and masked to the sequence field width; the field position is recorded
/// on the packet for in-place patching.
pub fn encode_with_format(
    format: &CustomFormat,
    priority: Priority,
    event: &Event,
    seq_counter: &mut u32,
) -> Packet {
    let mut payload = Vec::with_capacity(32);
    let mut sequence = SEQUENCE_ALL;
    let mut seq_pos = 0u8;
    let mut seq_len = 0u8;

    for field in &format.fields {
        let len = usize::from(field.length);
        let hi = field.hi_res;
        match field.field_type {
            FieldType::StatusCode => {
                codec::write_uint(&mut payload, u32::from(event.status_code), len);
            }
            FieldType::Timestamp => {
                codec::write_uint(&mut payload, event.timestamp, len);
            }
            FieldType::Index => {
                codec::write_uint(&mut payload, event.index, len);
            }
            FieldType::Sequence => {
                seq_pos = payload.len() as u8;
                seq_len = field.length;
                sequence = *seq_counter & sequence_mask(field.length);
                *seq_counter = seq_counter.wrapping_add(1);
                codec::write_uint(&mut payload, sequence, len);
            }
            FieldType::GpsPoint => {
                let ndx = clamp_index(field.index, event.gps_point.len());
                if len >= 8 {
                    event.gps_point[ndx].encode8(&mut payload);
                } else {
                    event.gps_point[ndx].encode6(&mut payload);
                }
            }
            FieldType::GpsAge => {
                let cap = if len == 1 { 0xFF } else { 0xFFFF };
                codec::write_uint(&mut payload, event.gps_age.min(cap), len);
            }
            FieldType::Speed => {
                let val = if hi {
                    round(event.speed_kph * 10.0)
                } else {
                    round(event.speed_kph)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::Heading => {
                let val = if hi {
                    round(event.heading * 100.0)
                } else {
                    round(event.heading * 255.0 / 360.0)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::Altitude => {
                let val = if hi {
                    round(event.altitude * 10.0)
                } else {
                    round(event.altitude)
                };
                codec::write_int(&mut payload, val as i32, len);
            }
            FieldType::Distance => {
                let val = if hi {
                    round(event.distance_km * 10.0)
                } else {
                    round(event.distance_km)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::Odometer => {
                let val = if hi {
                    round(event.odometer_km * 10.0)
                } else {
                    round(event.odometer_km)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::GeofenceId => {
                let ndx = clamp_index(field.index, event.geofence_id.len());
                codec::write_uint(&mut payload, event.geofence_id[ndx], len);
            }
            FieldType::TopSpeed => {
                let val = if hi {
                    round(event.top_speed_kph * 10.0)
                } else {
                    round(event.top_speed_kph)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::String => {
                let ndx = clamp_index(field.index, event.string.len());
                write_str(&mut payload, &event.string[ndx], len, false);
            }
            FieldType::StringPad => {
                let ndx = clamp_index(field.index, event.string.len());
                write_str(&mut payload, &event.string[ndx], len, true);
            }
            FieldType::Entity => {
                let ndx = clamp_index(field.index, event.entity.len());
                write_str(&mut payload, &event.entity[ndx], len, false);
            }
            FieldType::EntityPad => {
                let ndx = clamp_index(field.index, event.entity.len());
                write_str(&mut payload, &event.entity[ndx], len, true);
            }
            FieldType::Binary => {
                let data = &event.binary;
                if data.len() >= len {
                    payload.extend_from_slice(&data[..len]);
                } else {
                    payload.extend_from_slice(data);
                    payload.resize(payload.len() + (len - data.len()), 0);
                }
            }
            FieldType::InputId => codec::write_uint(&mut payload, event.input_id, len),
            FieldType::InputState => codec::write_uint(&mut payload, event.input_state, len),
            FieldType::OutputId => codec::write_uint(&mut payload, event.output_id, len),
            FieldType::OutputState => codec::write_uint(&mut payload, event.output_state, len),
            FieldType::ElapsedTime => {
                let ndx = clamp_index(field.index, event.elapsed_time_sec.len());
                codec::write_uint(&mut payload, event.elapsed_time_sec[ndx], len);
            }
            FieldType::Counter => codec::write_uint(&mut payload, event.counter, len),
            FieldType::Sensor32Low => {
                let ndx = clamp_index(field.index, event.sensor32_lo.len());
                codec::write_uint(&mut payload, event.sensor32_lo[ndx], len);
            }
            FieldType::Sensor32High => {
                let ndx = clamp_index(field.index, event.sensor32_hi.len());
                codec::write_uint(&mut payload, event.sensor32_hi[ndx], len);
            }
            FieldType::Sensor32Average => {
                let ndx = clamp_index(field.index, event.sensor32_av.len());
                codec::write_uint(&mut payload, event.sensor32_av[ndx], len);
            }
            FieldType::TempLow => {
                let ndx = clamp_index(field.index, event.temp_lo.len());
                codec::write_int(&mut payload, temp_value(event.temp_lo[ndx], hi, len), len);
            }
            FieldType::TempHigh => {
                let ndx = clamp_index(field.index, event.temp_hi.len());
                codec::write_int(&mut payload, temp_value(event.temp_hi[ndx], hi, len), len);
            }
            FieldType::TempAverage => {
                let ndx = clamp_index(field.index, event.temp_av.len());
                codec::write_int(&mut payload, temp_value(event.temp_av[ndx], hi, len), len);
            }
            FieldType::GpsDgpsUpdate => {
                codec::write_uint(&mut payload, event.gps_dgps_update, len);
            }
            FieldType::GpsHorzAccuracy => {
                let val = if hi {
                    round(event.gps_horz_accuracy * 10.0)
                } else {
                    round(event.gps_horz_accuracy)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::GpsVertAccuracy => {
                let val = if hi {
                    round(event.gps_vert_accuracy * 10.0)
                } else {
                    round(event.gps_vert_accuracy)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::GpsSatellites => {
                codec::write_uint(&mut payload, event.gps_satellites, len);
            }
            FieldType::GpsMagVariation => {
                codec::write_int(&mut payload, round(event.gps_mag_variation * 100.0) as i32, len);
            }
            FieldType::GpsQuality => codec::write_uint(&mut payload, event.gps_quality, len),
            FieldType::GpsType => codec::write_uint(&mut payload, event.gps_2d3d, len),
            FieldType::GpsGeoidHeight => {
                let val = if hi {
                    round(event.gps_geoid_height * 10.0)
                } else {
                    round(event.gps_geoid_height)
                };
                codec::write_int(&mut payload, val as i32, len);
            }
            FieldType::GpsPdop => {
                codec::write_uint(&mut payload, dop_value(event.gps_pdop, len), len);
            }
            FieldType::GpsHdop => {
                codec::write_uint(&mut payload, dop_value(event.gps_hdop, len), len);
            }
            FieldType::GpsVdop => {
                codec::write_uint(&mut payload, dop_value(event.gps_vdop, len), len);
            }
            FieldType::ObcValue => {
                let ndx = clamp_index(field.index, event.obc_value.len());
                if len >= 4 {
                    let frame = &event.obc_value[ndx];
                    codec::write_uint(&mut payload, u32::from(frame.mid), 2);
                    codec::write_uint(&mut payload, u32::from(frame.pid), 2);
                    let body = len - 4;
                    let data = &frame.data[..usize::from(frame.data_len).min(27)];
                    if data.len() >= body {
                        payload.extend_from_slice(&data[..body]);
                    } else {
                        payload.extend_from_slice(data);
                        payload.resize(payload.len() + (body - data.len()), 0);
                    }
                } else {
                    payload.resize(payload.len() + len, 0);
                }
            }
            FieldType::ObcGeneric => {
                let ndx = clamp_index(field.index, event.obc_generic.len());
                codec::write_uint(&mut payload, event.obc_generic[ndx], len);
            }
            FieldType::ObcJ1708Fault => {
                let ndx = clamp_index(field.index, event.obc_j1708_fault.len());
                codec::write_uint(&mut payload, event.obc_j1708_fault[ndx], len);
            }
            FieldType::ObcDistance => {
                let val = if hi {
                    round(event.obc_distance_km * 10.0)
                } else {
                    round(event.obc_distance_km)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcEngineHours => {
                codec::write_uint(&mut payload, round(event.obc_engine_hours * 10.0) as u32, len);
            }
            FieldType::ObcEngineRpm => {
                codec::write_uint(&mut payload, event.obc_engine_rpm, len);
            }
            FieldType::ObcCoolantTemp => {
                let val = if hi {
                    round(event.obc_coolant_temp * 10.0)
                } else {
                    round(event.obc_coolant_temp)
                };
                codec::write_int(&mut payload, val as i32, len);
            }
            FieldType::ObcCoolantLevel => {
                let val = if hi {
                    round(event.obc_coolant_level * 1000.0)
                } else {
                    round(event.obc_coolant_level * 100.0)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcOilLevel => {
                let val = if hi {
                    round(event.obc_oil_level * 1000.0)
                } else {
                    round(event.obc_oil_level * 100.0)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcOilPressure => {
                let val = if hi {
                    round(event.obc_oil_pressure * 10.0)
                } else {
                    round(event.obc_oil_pressure)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcFuelLevel => {
                let val = if hi {
                    round(event.obc_fuel_level * 1000.0)
                } else {
                    round(event.obc_fuel_level * 100.0)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcFuelEconomy => {
                // prefer the averaged economy, fall back to instantaneous
                let mut val = round(event.obc_avg_fuel_econ * 10.0);
                if val == 0 {
                    val = round(event.obc_fuel_economy * 10.0);
                }
                codec::write_uint(&mut payload, val as u32, len);
            }
            FieldType::ObcFuelUsed => {
                let val = if hi {
                    round(event.obc_fuel_used * 10.0)
                } else {
                    round(event.obc_fuel_used)
                };
                codec::write_uint(&mut payload, val as u32, len);
            }
        }
    }

    let mut pkt = Packet::with_priority(
        format.pkt_type,
        payload,
        if priority == Priority::None {
            Priority::Normal
        } else {
            priority
        },
    );
    pkt.sequence = sequence;
    pkt.seq_len = seq_len;
    pkt.seq_pos = seq_pos;
    pkt
}

/// Encodes an event by packet type using a caller-held sequence counter.
pub fn encode_packet(
    priority: Priority,
    pkt_type: u8,
    event: &Event,
    seq_counter: &mut u32,
) -> Option<Packet> {
    match format_for_type(pkt_type) {
        Some(format) => Some(encode_with_format(&format, priority, event, seq_counter)),
        None => {
            error!("Custom format not found: {:#04X}", pkt_type);
            None
        }
    }
}

/// Encodes an event with the global sequence counter and queues it.
pub fn add_event_packet(priority: Priority, pkt_type: u8, event: &Event) -> bool {
    let mut counter = EVENT_SEQUENCE.lock().unwrap();
    let Some(pkt) = encode_packet(priority, pkt_type, event, &mut counter) else {
        return false;
    };
    drop(counter);
    add_encoded_packet(&pkt)
}

/// Queues an already encoded packet.
pub fn add_encoded_packet(pkt: &Packet) -> bool {
    TOTAL_PACKET_COUNT.fetch_add(1, Ordering::SeqCst);
    EVENT_QUEUE.add(pkt)
}

/// Number of event packets generated since start.
pub fn total_packet_count() -> u32 {
    TOTAL_PACKET_COUNT.load(Ordering::SeqCst)
}

/// Number of event packets currently queued.
pub fn packet_count() -> usize {
    EVENT_QUEUE.len()
}

/// Decodes a payload back into an event, for diagnostics and tests.
/// Variable-length string fields follow the encoder's contract; fields the
/// decoder does not model are skipped at their declared width.
pub fn decode_with_format(format: &CustomFormat, payload: &[u8]) -> Event {
    let mut ev = Event::default();
    let mut pos = 0usize;
    for field in &format.fields {
        let len = usize::from(field.length);
        if pos >= payload.len() {
            break;
        }
        let buf = &payload[pos..];
        let hi = field.hi_res;
        let mut consumed = len;
        match field.field_type {
            FieldType::StatusCode => ev.status_code = codec::read_uint(buf, len) as u16,
            FieldType::Timestamp => ev.timestamp = codec::read_uint(buf, len),
            FieldType::Index => ev.index = codec::read_uint(buf, len),
            FieldType::Sequence => {}
            FieldType::GpsPoint => {
                ev.gps_point[clamp_index(field.index, 2)] = if len >= 8 {
                    GeoPoint::decode8(buf)
                } else {
                    GeoPoint::decode6(buf)
                };
            }
            FieldType::GpsAge => ev.gps_age = codec::read_uint(buf, len),
            FieldType::Speed => {
                let raw = codec::read_uint(buf, len) as f64;
                ev.speed_kph = if hi { raw / 10.0 } else { raw };
            }
            FieldType::Heading => {
                let raw = codec::read_uint(buf, len) as f64;
                ev.heading = if hi { raw / 100.0 } else { raw * 360.0 / 255.0 };
            }
            FieldType::Altitude => {
                let raw = f64::from(codec::read_int(buf, len));
                ev.altitude = if hi { raw / 10.0 } else { raw };
            }
            FieldType::Distance => {
                let raw = codec::read_uint(buf, len) as f64;
                ev.distance_km = if hi { raw / 10.0 } else { raw };
            }
            FieldType::Odometer => {
                let raw = codec::read_uint(buf, len) as f64;
                ev.odometer_km = if hi { raw / 10.0 } else { raw };
            }
            FieldType::GeofenceId => {
                ev.geofence_id[clamp_index(field.index, 2)] = codec::read_uint(buf, len);
            }
            FieldType::TopSpeed => {
                let raw = codec::read_uint(buf, len) as f64;
                ev.top_speed_kph = if hi { raw / 10.0 } else { raw };
            }
            FieldType::String | FieldType::Entity => {
                let (text, used) = read_var_str(buf, len);
                let slot = clamp_index(field.index, 2);
                if field.field_type == FieldType::String {
                    ev.string[slot] = text;
                } else {
                    ev.entity[slot] = text;
                }
                consumed = used;
            }
            FieldType::StringPad | FieldType::EntityPad => {
                let text = String::from_utf8_lossy(&buf[..len.min(buf.len())])
                    .trim_end_matches('\0')
                    .to_owned();
                let slot = clamp_index(field.index, 2);
                if field.field_type == FieldType::StringPad {
                    ev.string[slot] = text;
                } else {
                    ev.entity[slot] = text;
                }
            }
            FieldType::Binary => ev.binary = buf[..len.min(buf.len())].to_vec(),
            FieldType::InputId => ev.input_id = codec::read_uint(buf, len),
            FieldType::InputState => ev.input_state = codec::read_uint(buf, len),
            FieldType::OutputId => ev.output_id = codec::read_uint(buf, len),
            FieldType::OutputState => ev.output_state = codec::read_uint(buf, len),
            FieldType::ElapsedTime => {
                ev.elapsed_time_sec[clamp_index(field.index, 8)] = codec::read_uint(buf, len);
            }
            FieldType::Counter => ev.counter = codec::read_uint(buf, len),
            FieldType::Sensor32Low => ev.sensor32_lo[0] = codec::read_uint(buf, len),
            FieldType::Sensor32High => ev.sensor32_hi[0] = codec::read_uint(buf, len),
            FieldType::Sensor32Average => ev.sensor32_av[0] = codec::read_uint(buf, len),
            FieldType::TempLow => {
                let raw = f64::from(codec::read_int(buf, len));
                ev.temp_lo[clamp_index(field.index, 4)] = if hi { raw / 10.0 } else { raw };
            }
            FieldType::TempHigh => {
                let raw = f64::from(codec::read_int(buf, len));
                ev.temp_hi[clamp_index(field.index, 4)] = if hi { raw / 10.0 } else { raw };
            }
            FieldType::TempAverage => {
                let raw = f64::from(codec::read_int(buf, len));
                ev.temp_av[clamp_index(field.index, 4)] = if hi { raw / 10.0 } else { raw };
            }
            FieldType::GpsPdop => ev.gps_pdop = codec::read_uint(buf, len) as f64 / 10.0,
            FieldType::GpsHdop => ev.gps_hdop = codec::read_uint(buf, len) as f64 / 10.0,
            FieldType::GpsVdop => ev.gps_vdop = codec::read_uint(buf, len) as f64 / 10.0,
            // remaining fields are skipped at their declared width
            _ => {}
        }
        pos += consumed;
    }
    ev
}

fn read_var_str(buf: &[u8], len: usize) -> (String, usize) {
    let window = &buf[..len.min(buf.len())];
    match window.iter().position(|&b| b == 0) {
        Some(nul) => (
            String::from_utf8_lossy(&window[..nul]).into_owned(),
            nul + 1,
        ),
        None => (String::from_utf8_lossy(window).into_owned(), window.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::status::STATUS_LOCATION;

    fn sample_event() -> Event {
        let mut ev = Event::default();
        ev.status_code = STATUS_LOCATION;
        ev.timestamp = 1_700_000_000;
        ev.gps_point[0] = GeoPoint::new(37.7749, -122.4194);
        ev.speed_kph = 88.4;
        ev.heading = 271.25;
        ev.altitude = 123.4;
        ev.distance_km = 1523.7;
        ev
    }

    /// The standard fixed format is bit-exact: 2+4+6+1+1+2+3+1 = 20 bytes.
    #[test]
    fn fixed_std_layout() {
        let mut seq = 5;
        let pkt = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &sample_event(), &mut seq);
        assert_eq!(pkt.payload.len(), 20);
        assert_eq!(pkt.pkt_type, PKT_CLIENT_FIXED_FMT_STD);
        assert_eq!(&pkt.payload[0..2], &[0xF0, 0x20]); // status
        assert_eq!(codec::read_uint(&pkt.payload[2..], 4), 1_700_000_000);
        assert_eq!(pkt.payload[12], 88); // speed, rounded kph
        assert_eq!(pkt.sequence, 5);
        assert_eq!(pkt.seq_len, 1);
        assert_eq!(pkt.seq_pos, 19);
        assert_eq!(pkt.payload[19], 5);
        assert_eq!(seq, 6);
    }

    /// Encode-then-decode preserves values modulo the quantization step.
    #[test]
    fn encoder_round_trip_std() {
        let ev = sample_event();
        let mut seq = 0;
        let pkt = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &ev, &mut seq);
        let back = decode_with_format(&FIXED_FORMAT_STD, &pkt.payload);

        assert_eq!(back.status_code, ev.status_code);
        assert_eq!(back.timestamp, ev.timestamp);
        assert!((back.gps_point[0].latitude - ev.gps_point[0].latitude).abs() < 1e-4);
        assert!((back.gps_point[0].longitude - ev.gps_point[0].longitude).abs() < 1e-4);
        assert!((back.speed_kph - ev.speed_kph).abs() <= 0.5);
        assert!((back.heading - ev.heading).abs() <= 360.0 / 255.0);
        assert!((back.altitude - ev.altitude).abs() <= 0.5);
        assert!((back.distance_km - ev.distance_km).abs() <= 0.5);
    }

    #[test]
    fn encoder_round_trip_high() {
        let ev = sample_event();
        let mut seq = 0;
        let pkt = encode_with_format(&FIXED_FORMAT_HIGH, Priority::Normal, &ev, &mut seq);
        assert_eq!(pkt.payload.len(), 2 + 4 + 8 + 2 + 2 + 3 + 3 + 1);
        let back = decode_with_format(&FIXED_FORMAT_HIGH, &pkt.payload);

        assert!((back.gps_point[0].latitude - ev.gps_point[0].latitude).abs() < 1e-7);
        assert!((back.speed_kph - ev.speed_kph).abs() <= 0.05);
        assert!((back.heading - ev.heading).abs() <= 0.005);
        assert!((back.altitude - ev.altitude).abs() <= 0.05);
        assert!((back.distance_km - ev.distance_km).abs() <= 0.05);
    }

    /// Consecutive encoded packets carry sequence numbers differing by 1
    /// modulo 2^(8 * seq_len).
    #[test]
    fn sequence_monotonicity() {
        let mut seq = 0xFE;
        let ev = sample_event();
        let p1 = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &ev, &mut seq);
        let p2 = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &ev, &mut seq);
        let p3 = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &ev, &mut seq);
        assert_eq!(p1.sequence, 0xFE);
        assert_eq!(p2.sequence, 0xFF);
        assert_eq!(p3.sequence, 0x00); // wraps at the 1-byte mask
    }

    /// Temperatures saturate at the field-width limits.
    #[test]
    fn temperature_saturation() {
        let fmt = CustomFormat {
            pkt_type: 0x50,
            fields: vec![
                FieldDef::new(FieldType::TempLow, LO_RES, 0, 1),
                FieldDef::new(FieldType::TempHigh, HI_RES, 0, 2),
            ],
        };
        let mut ev = Event::default();
        ev.temp_lo[0] = 500.0;
        ev.temp_hi[0] = -4000.0;
        let mut seq = 0;
        let pkt = encode_with_format(&fmt, Priority::Normal, &ev, &mut seq);
        assert_eq!(pkt.payload[0] as i8, 126);
        assert_eq!(codec::read_int(&pkt.payload[1..], 2), -32766);
    }

    /// One-byte DOP fields cap at 25.5.
    #[test]
    fn dop_cap() {
        let fmt = CustomFormat {
            pkt_type: 0x51,
            fields: vec![
                FieldDef::new(FieldType::GpsHdop, LO_RES, 0, 1),
                FieldDef::new(FieldType::GpsPdop, HI_RES, 0, 2),
            ],
        };
        let mut ev = Event::default();
        ev.gps_hdop = 99.0;
        ev.gps_pdop = 42.1;
        let mut seq = 0;
        let pkt = encode_with_format(&fmt, Priority::Normal, &ev, &mut seq);
        assert_eq!(pkt.payload[0], 255);
        assert_eq!(codec::read_uint(&pkt.payload[1..], 2), 421);
    }

    /// Short strings terminate with a single NUL and the payload continues
    /// immediately after it; padded strings fill the field width.
    #[test]
    fn string_encoding() {
        let fmt = CustomFormat {
            pkt_type: 0x52,
            fields: vec![
                FieldDef::new(FieldType::String, LO_RES, 0, 8),
                FieldDef::new(FieldType::StatusCode, LO_RES, 0, 2),
            ],
        };
        let mut ev = Event::default();
        ev.string[0] = "abc".to_owned();
        ev.status_code = 0xF020;
        let mut seq = 0;
        let pkt = encode_with_format(&fmt, Priority::Normal, &ev, &mut seq);
        assert_eq!(&pkt.payload, &[b'a', b'b', b'c', 0, 0xF0, 0x20]);

        let back = decode_with_format(&fmt, &pkt.payload);
        assert_eq!(back.string[0], "abc");
        assert_eq!(back.status_code, 0xF020);
    }

    #[test]
    fn format_declaration_packet() {
        let pkt = format_def_packet(PKT_CLIENT_FIXED_FMT_STD).unwrap();
        assert_eq!(pkt.pkt_type, PKT_CLIENT_FORMAT_DEF_24);
        // type nibble 0x0, field count 8, then 8 descriptors of 3 bytes
        assert_eq!(pkt.payload.len(), 1 + 8 * 3);
        assert_eq!(pkt.payload[0], 0x08);
        // first descriptor: status code, lo-res, index 0, 2 bytes
        assert_eq!(codec::read_uint(&pkt.payload[1..], 3), 0x0001_0002);
    }

    #[test]
    fn custom_format_registration() {
        let fmt = CustomFormat {
            pkt_type: 0x5E,
            fields: vec![FieldDef::new(FieldType::StatusCode, LO_RES, 0, 2)],
        };
        assert!(add_custom_format(fmt));
        assert!(format_for_type(0x5E).is_some());
        assert!(format_for_type(0x5D).is_none());
    }
}
