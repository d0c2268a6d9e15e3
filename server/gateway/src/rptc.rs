//! `RPTC` configuration payload parsing (§4.2). Byte offsets are relative to
//! the start of the 302-byte frame, counted *after* the 4-byte `RPTC`
//! signature and the 4-byte repeater id (so field offsets below are absolute
//! into the full datagram, starting at 8).

const CALLSIGN: (usize, usize) = (8, 16);
const RX_FREQ: (usize, usize) = (16, 25);
const TX_FREQ: (usize, usize) = (25, 34);
const TX_POWER: (usize, usize) = (34, 36);
const COLOR_CODE: (usize, usize) = (36, 38);
const LATITUDE: (usize, usize) = (38, 46);
const LONGITUDE: (usize, usize) = (46, 55);
const HEIGHT: (usize, usize) = (55, 58);
const LOCATION: (usize, usize) = (58, 78);
const DESCRIPTION: (usize, usize) = (78, 97);
const SLOTS: (usize, usize) = (97, 98);
const URL: (usize, usize) = (98, 222);
const SOFTWARE_ID: (usize, usize) = (222, 262);
const PACKAGE_ID: (usize, usize) = (262, 302);

pub const RPTC_CONFIG_LEN: usize = 302;

#[derive(Debug, Clone)]
pub struct RptcConfig {
    pub callsign: String,
    pub rx_freq: String,
    pub tx_freq: String,
    pub tx_power: u8,
    pub color_code: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub height: u16,
    pub location: String,
    pub description: String,
    pub slots: u8,
    pub url: String,
    pub software_id: String,
    pub package_id: String,
}

fn field(buf: &[u8], (start, end): (usize, usize)) -> String {
    String::from_utf8_lossy(&buf[start..end])
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn valid_callsign(callsign: &str) -> bool {
    let len = callsign.len();
    (4..=8).contains(&len) && callsign.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Parses and validates an `RPTC` config payload. Returns `None` on any
/// failure — callsign regex, numeric parse, or out-of-range bound — per
/// §4.9: the caller drops the frame and leaves the session in
/// `WAITING_CONFIG` so the peer retries.
pub fn parse_rptc(buf: &[u8]) -> Option<RptcConfig> {
    if buf.len() != RPTC_CONFIG_LEN {
        return None;
    }

    let callsign = field(buf, CALLSIGN).to_uppercase();
    if !valid_callsign(&callsign) {
        return None;
    }

    let tx_power: u8 = field(buf, TX_POWER).parse().ok()?;
    let tx_power = tx_power.min(99);

    let color_code: u8 = field(buf, COLOR_CODE).parse().ok()?;
    let color_code = color_code.min(15);

    let latitude: f64 = field(buf, LATITUDE).parse().ok()?;
    if !(-90.0..=90.0).contains(&latitude) {
        return None;
    }

    let longitude: f64 = field(buf, LONGITUDE).parse().ok()?;
    if !(-180.0..=180.0).contains(&longitude) {
        return None;
    }

    let height: u16 = field(buf, HEIGHT).parse().ok()?;
    let height = height.min(999);

    let slots: u8 = field(buf, SLOTS).parse().ok()?;

    let software_id = field(buf, SOFTWARE_ID);
    let software_id = if software_id.is_empty() {
        format!("DMRHub v{}-{}", env!("CARGO_PKG_VERSION"), "src")
    } else {
        software_id
    };

    Some(RptcConfig {
        callsign,
        rx_freq: field(buf, RX_FREQ),
        tx_freq: field(buf, TX_FREQ),
        tx_power,
        color_code,
        latitude,
        longitude,
        height,
        location: field(buf, LOCATION),
        description: field(buf, DESCRIPTION),
        slots,
        url: field(buf, URL),
        software_id,
        package_id: field(buf, PACKAGE_ID),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        let mut buf = vec![b' '; RPTC_CONFIG_LEN];
        let mut put = |(start, end): (usize, usize), s: &str| {
            let bytes = s.as_bytes();
            let len = bytes.len().min(end - start);
            buf[start..start + len].copy_from_slice(&bytes[..len]);
        };
        put(CALLSIGN, "W1ABC   ");
        put(RX_FREQ, "446006250");
        put(TX_FREQ, "446006250");
        put(TX_POWER, "25");
        put(COLOR_CODE, "1 ");
        put(LATITUDE, "40.7128 ");
        put(LONGITUDE, "-74.0060 ");
        put(HEIGHT, "30 ");
        put(LOCATION, "New York");
        put(DESCRIPTION, "Test repeater");
        put(SLOTS, "2");
        put(URL, "https://example.com");
        put(SOFTWARE_ID, "");
        put(PACKAGE_ID, "");
        buf
    }

    #[test]
    fn parses_a_well_formed_payload() {
        let cfg = parse_rptc(&sample_payload()).expect("should parse");
        assert_eq!(cfg.callsign, "W1ABC");
        assert_eq!(cfg.tx_power, 25);
        assert_eq!(cfg.color_code, 1);
        assert!((cfg.latitude - 40.7128).abs() < 1e-6);
        assert!((cfg.longitude + 74.0060).abs() < 1e-6);
        assert_eq!(cfg.slots, 2);
        assert!(cfg.software_id.starts_with("DMRHub v"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(parse_rptc(&[0u8; 10]).is_none());
    }

    #[test]
    fn rejects_bad_callsign() {
        let mut buf = sample_payload();
        buf[CALLSIGN.0..CALLSIGN.1].copy_from_slice(b"w1-abc!0");
        assert!(parse_rptc(&buf).is_none());
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let mut buf = sample_payload();
        let mut lat = vec![b' '; LATITUDE.1 - LATITUDE.0];
        let s = b"120.0000";
        lat[..s.len()].copy_from_slice(s);
        buf[LATITUDE.0..LATITUDE.1].copy_from_slice(&lat);
        assert!(parse_rptc(&buf).is_none());
    }

    #[test]
    fn clamps_tx_power_and_color_code() {
        let mut buf = sample_payload();
        buf[TX_POWER.0..TX_POWER.1].copy_from_slice(b"99");
        let cfg = parse_rptc(&buf).unwrap();
        assert_eq!(cfg.tx_power, 99);
    }
}
