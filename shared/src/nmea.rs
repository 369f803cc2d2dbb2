//! NMEA-0183 sentence parser
//!
//! Only the two sentences needed for a position fix are decoded:
//! - `RMC`: time, validity, position, speed, course
//! - `GGA`: position, fix quality, satellites, HDOP, altitude
//!
//! Any talker id (`GP`, `GN`, `GL`, ...) is accepted. Other sentence types
//! are returned as [`NmeaSentence::Other`].

use thiserror::Error;

/// Errors that can occur while parsing a sentence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NmeaError {
    #[error("Empty sentence")]
    Empty,

    #[error("Sentence does not start with '$'")]
    MissingStart,

    #[error("Checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    BadChecksum { expected: u8, computed: u8 },

    #[error("Sentence {0} has too few fields")]
    Truncated(String),

    #[error("Invalid {0} field")]
    InvalidField(&'static str),
}

/// Recommended minimum data (RMC)
#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    /// UTC time, `hhmmss.ss`
    pub time: Option<String>,
    /// `A` status (data valid)
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_knots: Option<f32>,
    pub course_deg: Option<f32>,
    /// UTC date, `ddmmyy`
    pub date: Option<String>,
}

/// Fix data (GGA)
#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 0 = no fix
    pub fix_quality: u8,
    pub satellites: Option<u8>,
    pub hdop: Option<f32>,
    pub altitude_m: Option<f64>,
}

/// A parsed sentence
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Rmc(Rmc),
    Gga(Gga),
    /// Valid sentence of an unhandled type (e.g. `GSV`)
    Other(String),
}

/// Parse a single sentence such as `$GPRMC,...*6A`
///
/// The checksum is verified when present.
pub fn parse_sentence(line: &str) -> Result<NmeaSentence, NmeaError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(NmeaError::Empty);
    }
    let body = line.strip_prefix('$').ok_or(NmeaError::MissingStart)?;

    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            let expected =
                u8::from_str_radix(checksum, 16).map_err(|_| NmeaError::InvalidField("checksum"))?;
            let computed = checksum_of(body);
            if expected != computed {
                return Err(NmeaError::BadChecksum { expected, computed });
            }
            body
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    if address.len() < 5 || !address.is_ascii() {
        return Err(NmeaError::InvalidField("address"));
    }
    let kind = &address[address.len() - 3..];

    match kind {
        "RMC" => parse_rmc(&fields).map(NmeaSentence::Rmc),
        "GGA" => parse_gga(&fields).map(NmeaSentence::Gga),
        other => Ok(NmeaSentence::Other(other.to_string())),
    }
}

/// XOR of all bytes between `$` and `*`
pub fn checksum_of(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

fn parse_rmc(fields: &[&str]) -> Result<Rmc, NmeaError> {
    if fields.len() < 10 {
        return Err(NmeaError::Truncated(fields[0].to_string()));
    }

    Ok(Rmc {
        time: non_empty(fields[1]),
        active: fields[2] == "A",
        latitude: parse_coordinate(fields[3], fields[4], "latitude")?,
        longitude: parse_coordinate(fields[5], fields[6], "longitude")?,
        speed_knots: parse_number(fields[7], "speed")?,
        course_deg: parse_number(fields[8], "course")?,
        date: non_empty(fields[9]),
    })
}

fn parse_gga(fields: &[&str]) -> Result<Gga, NmeaError> {
    if fields.len() < 10 {
        return Err(NmeaError::Truncated(fields[0].to_string()));
    }

    Ok(Gga {
        latitude: parse_coordinate(fields[2], fields[3], "latitude")?,
        longitude: parse_coordinate(fields[4], fields[5], "longitude")?,
        fix_quality: parse_number(fields[6], "fix quality")?.unwrap_or(0),
        satellites: parse_number(fields[7], "satellites")?,
        hdop: parse_number(fields[8], "hdop")?,
        altitude_m: parse_number(fields[9], "altitude")?,
    })
}

fn non_empty(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn parse_number<T: std::str::FromStr>(
    field: &str,
    name: &'static str,
) -> Result<Option<T>, NmeaError> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse()
        .map(Some)
        .map_err(|_| NmeaError::InvalidField(name))
}

/// Convert `dddmm.mmmm` + hemisphere into signed decimal degrees
fn parse_coordinate(
    value: &str,
    hemisphere: &str,
    name: &'static str,
) -> Result<Option<f64>, NmeaError> {
    let Some(raw) = parse_number::<f64>(value, name)? else {
        return Ok(None);
    };

    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Ok(Some(decimal)),
        "S" | "W" => Ok(Some(-decimal)),
        _ => Err(NmeaError::InvalidField(name)),
    }
}
