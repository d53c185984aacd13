//! Polyline-6 codec: Google-style variable-length integer encoding at
//! 1e-6 degree precision, the engine's geometry wire format.
//!
//! Decoded output is `[lon, lat]` pairs, matching the GeoJSON axis order the
//! rest of the gateway uses. The wire itself stores latitude first.

use serde::Deserialize;

const PRECISION: f64 = 1e6;

/// Decode an encoded shape into `[lon, lat]` pairs.
///
/// A truncated trailing chunk is dropped rather than treated as an error;
/// every complete coordinate before it is returned.
pub fn decode(encoded: &str) -> Vec<[f64; 2]> {
    let bytes = encoded.as_bytes();
    let mut coords = Vec::new();
    let mut i = 0;
    let mut previous = [0i64; 2];

    while i < bytes.len() {
        let mut deltas = [0i64; 2];

        for delta in &mut deltas {
            let mut shift = 0;
            let mut value = 0i64;
            loop {
                if i >= bytes.len() {
                    return coords;
                }
                let chunk = i64::from(bytes[i]) - 63;
                i += 1;
                value |= (chunk & 0x1f) << shift;
                shift += 5;
                if chunk < 0x20 {
                    break;
                }
            }
            *delta = (value >> 1) ^ -(value & 1);
        }

        previous[0] += deltas[0];
        previous[1] += deltas[1];
        coords.push([
            previous[1] as f64 / PRECISION,
            previous[0] as f64 / PRECISION,
        ]);
    }

    coords
}

/// Encode `[lon, lat]` pairs back into the engine's shape format.
pub fn encode(coords: &[[f64; 2]]) -> String {
    fn push_delta(delta: i64, out: &mut String) {
        let mut value = if delta < 0 { !(delta << 1) } else { delta << 1 };
        while value >= 0x20 {
            out.push((((0x20 | (value & 0x1f)) + 63) as u8) as char);
            value >>= 5;
        }
        out.push(((value + 63) as u8) as char);
    }

    let mut encoded = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for coord in coords {
        let lat = (coord[1] * PRECISION).round() as i64;
        let lon = (coord[0] * PRECISION).round() as i64;
        push_delta(lat - prev_lat, &mut encoded);
        push_delta(lon - prev_lon, &mut encoded);
        prev_lat = lat;
        prev_lon = lon;
    }

    encoded
}

pub(crate) fn deserialize_shape<'de, D>(deserializer: D) -> Result<Vec<[f64; 2]>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(decode(s.as_str()))
}

#[cfg(test)]
mod test {
    use super::*;

    // The three classic reference coordinates, encoded at precision 6.
    const GOLDEN: &str = "_izlhA~rlgdF_{geC~ywl@_kwzCn`{nI";

    #[test]
    fn golden_decode() {
        assert_eq!(
            decode(GOLDEN),
            vec![[-120.2, 38.5], [-120.95, 40.7], [-126.453, 43.252]]
        );
    }

    #[test]
    fn golden_encode() {
        let coords = [[-120.2, 38.5], [-120.95, 40.7], [-126.453, 43.252]];
        assert_eq!(encode(&coords), GOLDEN);
    }

    #[test]
    fn decode_then_encode_round_trips_bytes() {
        for encoded in [GOLDEN, "_izlhA~rlgdF", "??"] {
            assert_eq!(encode(&decode(encoded)), encoded);
        }
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode("").is_empty());
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn single_point_round_trips() {
        let coords = [[-122.419418, 37.774929]];
        assert_eq!(decode(&encode(&coords)), coords);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let mut encoded = GOLDEN.to_owned();
        encoded.push('_'); // opens a chunk that never terminates
        assert_eq!(decode(&encoded).len(), 3);
    }
}
