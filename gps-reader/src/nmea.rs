//! NMEA 0183 GGA sentence parsing

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmeaError {
    #[error("Not an NMEA sentence")]
    NotNmea,
    #[error("Checksum mismatch: computed {computed:02X}, sentence says {stated:02X}")]
    Checksum { computed: u8, stated: u8 },
    #[error("Malformed checksum field")]
    BadChecksumField,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field: {0}")]
    InvalidField(&'static str),
}

/// UTC time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Fix data from one GGA sentence
#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub time: Option<UtcTime>,
    /// Decimal degrees, south and west negative
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 0 = no fix, 1 = GPS, 2 = DGPS, ...
    pub quality: u8,
    pub satellites: u8,
    /// Metres above mean sea level
    pub altitude_m: Option<f32>,
}

impl Gga {
    pub fn has_fix(&self) -> bool {
        self.quality > 0 && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Parse one line. `Ok(None)` for valid sentences other than GGA.
pub fn parse_sentence(line: &str) -> Result<Option<Gga>, NmeaError> {
    let line = line.trim();
    let body = line.strip_prefix('$').ok_or(NmeaError::NotNmea)?;
    let body = verify_checksum(body)?;

    let mut fields = body.split(',');
    let kind = fields.next().ok_or(NmeaError::NotNmea)?;
    if kind.len() != 5 || !kind.ends_with("GGA") {
        return Ok(None);
    }

    let fields: Vec<&str> = fields.collect();
    let field = |index: usize, name: &'static str| -> Result<&str, NmeaError> {
        fields.get(index).copied().ok_or(NmeaError::MissingField(name))
    };

    let time = parse_time(field(0, "time")?);
    let latitude = parse_coordinate(field(1, "latitude")?, field(2, "lat_dir")?);
    let longitude = parse_coordinate(field(3, "longitude")?, field(4, "lon_dir")?);
    let quality = parse_or_zero(field(5, "quality")?, "quality")?;
    let satellites = parse_or_zero(field(6, "satellites")?, "satellites")?;
    let altitude = field(8, "altitude")?;
    let altitude_m = if altitude.is_empty() {
        None
    } else {
        Some(
            altitude
                .parse()
                .map_err(|_| NmeaError::InvalidField("altitude"))?,
        )
    };

    Ok(Some(Gga {
        time,
        latitude,
        longitude,
        quality,
        satellites,
        altitude_m,
    }))
}

/// Check and strip the `*hh` suffix; sentences without one are accepted
fn verify_checksum(body: &str) -> Result<&str, NmeaError> {
    let Some((data, stated)) = body.split_once('*') else {
        return Ok(body);
    };

    let stated = u8::from_str_radix(stated, 16).map_err(|_| NmeaError::BadChecksumField)?;
    let computed = data.bytes().fold(0u8, |acc, b| acc ^ b);
    if computed != stated {
        return Err(NmeaError::Checksum { computed, stated });
    }
    Ok(data)
}

fn parse_or_zero(value: &str, name: &'static str) -> Result<u8, NmeaError> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| NmeaError::InvalidField(name))
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) plus hemisphere to decimal degrees
fn parse_coordinate(coord: &str, dir: &str) -> Option<f64> {
    if coord.is_empty() || dir.is_empty() {
        return None;
    }

    let value = coord.parse::<f64>().ok()?;
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    match dir {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

/// `hhmmss(.ss)`
fn parse_time(time: &str) -> Option<UtcTime> {
    if time.len() < 6 || !time.is_char_boundary(6) {
        return None;
    }
    Some(UtcTime {
        hour: time[0..2].parse().ok()?,
        minute: time[2..4].parse().ok()?,
        second: time[4..6].parse().ok()?,
    })
}
