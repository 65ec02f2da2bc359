//! Fill colour parsing for hidden regions.
//!
//! Accepts `#rgb` and `#rrggbb`. Anything else paints solid black.

pub const FALLBACK_FILL: [u8; 3] = [0, 0, 0];

/// Parse a region colour, falling back to black.
pub fn parse_fill_color(color: Option<&str>) -> [u8; 3] {
    color.and_then(parse_hex).unwrap_or(FALLBACK_FILL)
}

fn parse_hex(color: &str) -> Option<[u8; 3]> {
    let digits = color.strip_prefix('#')?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |c: u8| -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => c - b'A' + 10,
        }
    };
    let d = digits.as_bytes();
    match d.len() {
        3 => Some([
            nibble(d[0]) * 17,
            nibble(d[1]) * 17,
            nibble(d[2]) * 17,
        ]),
        6 => Some([
            nibble(d[0]) << 4 | nibble(d[1]),
            nibble(d[2]) << 4 | nibble(d[3]),
            nibble(d[4]) << 4 | nibble(d[5]),
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_six_digit() {
        assert_eq!(parse_fill_color(Some("#ff8000")), [255, 128, 0]);
        assert_eq!(parse_fill_color(Some("#A0b0C0")), [0xa0, 0xb0, 0xc0]);
    }

    #[test]
    fn test_three_digit_expands() {
        assert_eq!(parse_fill_color(Some("#f80")), [255, 136, 0]);
        assert_eq!(parse_fill_color(Some("#FFF")), [255, 255, 255]);
    }

    #[test]
    fn test_invalid_falls_back_to_black() {
        for bad in ["notacolor", "#12", "#1234", "ff0000", "#ggg", "#ff00001", ""] {
            assert_eq!(parse_fill_color(Some(bad)), FALLBACK_FILL, "{bad}");
        }
        assert_eq!(parse_fill_color(None), FALLBACK_FILL);
    }
}
