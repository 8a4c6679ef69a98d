//! GPS point arithmetic and wire packing.

use crate::codec::round;

/// Average earth radius, in kilometers: `(2a + b) / 3`.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
/// Average earth radius, in meters.
pub const EARTH_RADIUS_METERS: f64 = EARTH_RADIUS_KM * 1000.0;
/// Kilometers per knot, for NMEA speed conversion.
pub const KILOMETERS_PER_KNOT: f64 = 1.852;

// Packed-point scales. Latitude spans 180 degrees, longitude 360.
const LAT_SCALE_24: f64 = 16_777_215.0 / 180.0;
const LON_SCALE_24: f64 = 16_777_215.0 / 360.0;
const LAT_SCALE_32: f64 = 4_294_967_295.0 / 180.0;
const LON_SCALE_32: f64 = 4_294_967_295.0 / 360.0;

/// A latitude/longitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    /// Latitude, in degrees (positive north).
    pub latitude: f64,
    /// Longitude, in degrees (positive east).
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a new point.
    pub fn new(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    /// Checks point validity: (0, 0) and out-of-range coordinates are
    /// invalid.
    pub fn is_valid(&self) -> bool {
        if self.latitude == 0.0 && self.longitude == 0.0 {
            return false;
        }
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another point, in radians.
    pub fn radians_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (lat2 - lat1) / 2.0;
        let dlon = (other.longitude - self.longitude).to_radians() / 2.0;
        let a = dlat.sin().powi(2) + lat1.cos() * lat2.cos() * dlon.sin().powi(2);
        2.0 * a.sqrt().min(1.0).asin()
    }

    /// Great-circle distance to another point, in meters.
    pub fn meters_to(&self, other: &GeoPoint) -> f64 {
        self.radians_to(other) * EARTH_RADIUS_METERS
    }

    /// Great-circle distance to another point, in kilometers.
    pub fn kilometers_to(&self, other: &GeoPoint) -> f64 {
        self.radians_to(other) * EARTH_RADIUS_KM
    }

    /// Packs the point into 6 bytes (two 24-bit big-endian integers).
    /// An invalid point packs as all zeros.
    pub fn encode6(&self, out: &mut Vec<u8>) {
        if self.is_valid() {
            let lat = round((self.latitude + 90.0) * LAT_SCALE_24).clamp(0, 0x00FF_FFFF) as u32;
            let lon = round((self.longitude + 180.0) * LON_SCALE_24).clamp(0, 0x00FF_FFFF) as u32;
            crate::codec::write_uint(out, lat, 3);
            crate::codec::write_uint(out, lon, 3);
        } else {
            out.extend_from_slice(&[0; 6]);
        }
    }

    /// Unpacks a 6-byte point. All-zero input yields the invalid (0, 0).
    pub fn decode6(buf: &[u8]) -> GeoPoint {
        let lat = crate::codec::read_uint(buf, 3);
        let lon = crate::codec::read_uint(&buf[3..], 3);
        if lat == 0 && lon == 0 {
            return GeoPoint::default();
        }
        GeoPoint {
            latitude: f64::from(lat) / LAT_SCALE_24 - 90.0,
            longitude: f64::from(lon) / LON_SCALE_24 - 180.0,
        }
    }

    /// Packs the point into 8 bytes (two 32-bit big-endian integers).
    /// An invalid point packs as all zeros.
    pub fn encode8(&self, out: &mut Vec<u8>) {
        if self.is_valid() {
            let lat = round((self.latitude + 90.0) * LAT_SCALE_32).clamp(0, 0xFFFF_FFFF) as u32;
            let lon = round((self.longitude + 180.0) * LON_SCALE_32).clamp(0, 0xFFFF_FFFF) as u32;
            crate::codec::write_uint(out, lat, 4);
            crate::codec::write_uint(out, lon, 4);
        } else {
            out.extend_from_slice(&[0; 8]);
        }
    }

    /// Unpacks an 8-byte point. All-zero input yields the invalid (0, 0).
    pub fn decode8(buf: &[u8]) -> GeoPoint {
        let lat = crate::codec::read_uint(buf, 4);
        let lon = crate::codec::read_uint(&buf[4..], 4);
        if lat == 0 && lon == 0 {
            return GeoPoint::default();
        }
        GeoPoint {
            latitude: f64::from(lat) / LAT_SCALE_32 - 90.0,
            longitude: f64::from(lon) / LON_SCALE_32 - 180.0,
        }
    }
}

/// A point with its fix time and an odometer reading, the payload of
/// GPS-typed properties.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsOdometer {
    /// Position.
    pub point: GeoPoint,
    /// Fix time, UTC seconds.
    pub fixtime: u32,
    /// Odometer reading at the fix, meters.
    pub meters: u32,
}

impl GpsOdometer {
    /// Checks whether a fix has ever been recorded.
    pub fn is_defined(&self) -> bool {
        self.fixtime != 0 || self.point.is_valid()
    }

    /// Renders as `fixtime,lat,lon[,meters]`.
    pub fn to_csv(&self) -> String {
        if self.meters != 0 {
            format!(
                "{},{:.5},{:.5},{}",
                self.fixtime, self.point.latitude, self.point.longitude, self.meters
            )
        } else {
            format!(
                "{},{:.5},{:.5}",
                self.fixtime, self.point.latitude, self.point.longitude
            )
        }
    }

    /// Parses `fixtime,lat,lon[,meters]`. Returns `None` when even the
    /// fix time is missing or unparsable.
    pub fn from_csv(text: &str) -> Option<GpsOdometer> {
        let mut fields = text.split(',').map(str::trim);
        let fixtime = fields.next()?.parse().ok()?;
        let latitude = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0.0);
        let longitude = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0.0);
        let meters = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        Some(GpsOdometer {
            point: GeoPoint::new(latitude, longitude),
            fixtime,
            meters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SF: GeoPoint = GeoPoint {
        latitude: 37.7749,
        longitude: -122.4194,
    };

    #[test]
    fn point_validity() {
        assert!(SF.is_valid());
        assert!(!GeoPoint::new(0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(GeoPoint::new(-33.8688, 151.2093).is_valid());
    }

    /// SFO to LAX is roughly 543 km along the great circle.
    #[test]
    fn great_circle_distance() {
        let sfo = GeoPoint::new(37.6188, -122.3756);
        let lax = GeoPoint::new(33.9416, -118.4085);
        let km = sfo.kilometers_to(&lax);
        assert!((540.0..548.0).contains(&km), "got {km} km");

        assert!(SF.meters_to(&SF) < 0.01);
    }

    /// 6-byte packing preserves the latitude within 180/(2^24 - 1) degrees
    /// and the longitude within 360/(2^24 - 1).
    #[test]
    fn pack6_round_trip() {
        let mut buf = Vec::new();
        SF.encode6(&mut buf);
        assert_eq!(buf.len(), 6);
        let back = GeoPoint::decode6(&buf);
        assert!((back.latitude - SF.latitude).abs() <= 180.0 / 16_777_215.0);
        assert!((back.longitude - SF.longitude).abs() <= 360.0 / 16_777_215.0);
    }

    /// 8-byte packing preserves the latitude within 180/(2^32 - 1) degrees
    /// and the longitude within 360/(2^32 - 1).
    #[test]
    fn pack8_round_trip() {
        let mut buf = Vec::new();
        SF.encode8(&mut buf);
        assert_eq!(buf.len(), 8);
        let back = GeoPoint::decode8(&buf);
        assert!((back.latitude - SF.latitude).abs() <= 180.0 / 4_294_967_295.0);
        assert!((back.longitude - SF.longitude).abs() <= 360.0 / 4_294_967_295.0);
    }

    /// The invalid origin packs to zeros and unpacks back to the origin.
    #[test]
    fn invalid_round_trip() {
        let mut buf = Vec::new();
        GeoPoint::default().encode6(&mut buf);
        assert_eq!(buf, [0; 6]);
        assert_eq!(GeoPoint::decode6(&buf), GeoPoint::default());

        buf.clear();
        GeoPoint::default().encode8(&mut buf);
        assert_eq!(buf, [0; 8]);
        assert_eq!(GeoPoint::decode8(&buf), GeoPoint::default());
    }

    #[test]
    fn odometer_csv_round_trip() {
        let odom = GpsOdometer {
            point: SF,
            fixtime: 1_700_000_000,
            meters: 12_345,
        };
        let text = odom.to_csv();
        assert_eq!(text, "1700000000,37.77490,-122.41940,12345");
        let back = GpsOdometer::from_csv(&text).unwrap();
        assert_eq!(back.fixtime, odom.fixtime);
        assert_eq!(back.meters, odom.meters);
        assert!((back.point.latitude - odom.point.latitude).abs() < 1e-5);

        let bare = GpsOdometer::from_csv("0").unwrap();
        assert!(!bare.is_defined());
        assert!(GpsOdometer::from_csv("").is_none());
    }
}
