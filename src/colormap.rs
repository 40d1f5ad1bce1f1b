//! Colours, named colormaps and linear normalisation for the colour scale.

use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 0.0 (transparent) to 1.0 (opaque).
    pub a: f64,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const TRANSPARENT: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 0.0,
    };

    /// Parses `#rgb`, `#rrggbb`, `#rrggbbaa`, a named colour, `none`, or a
    /// grayscale level such as `"0.8"`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            return hex_to_color(hex).ok_or_else(|| format!("invalid hex colour '{}'", text));
        }
        if let Ok(level) = text.parse::<f64>() {
            if (0.0..=1.0).contains(&level) {
                let v = (level * 255.0).round() as u8;
                return Ok(Color::rgb(v, v, v));
            }
            return Err(format!("grayscale level '{}' must be within 0..1", text));
        }
        let lower = text.to_lowercase();
        if lower == "none" || lower == "transparent" {
            return Ok(Color::TRANSPARENT);
        }
        NAMED_COLORS
            .iter()
            .find(|(name, _)| *name == lower)
            .and_then(|(_, hex)| hex_to_color(hex))
            .ok_or_else(|| format!("unknown colour '{}'", text))
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    fn lerp(&self, other: &Color, t: f64) -> Color {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: self.a + (other.a - self.a) * t,
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse(&value)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_to_color(hex: &str) -> Option<Color> {
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 | 8 => hex.to_string(),
        _ => return None,
    };
    let byte = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    let alpha = if expanded.len() == 8 {
        byte(6)? as f64 / 255.0
    } else {
        1.0
    };
    Some(Color {
        r: byte(0)?,
        g: byte(2)?,
        b: byte(4)?,
        a: alpha,
    })
}

const NAMED_COLORS: &[(&str, &str)] = &[
    ("aliceblue", "f0f8ff"),
    ("beige", "f5f5dc"),
    ("black", "000000"),
    ("blue", "0000ff"),
    ("brown", "a52a2a"),
    ("cornflowerblue", "6495ed"),
    ("cyan", "00ffff"),
    ("darkblue", "00008b"),
    ("darkgray", "a9a9a9"),
    ("darkgreen", "006400"),
    ("darkgrey", "a9a9a9"),
    ("darkred", "8b0000"),
    ("dimgray", "696969"),
    ("dimgrey", "696969"),
    ("gainsboro", "dcdcdc"),
    ("gold", "ffd700"),
    ("gray", "808080"),
    ("green", "008000"),
    ("grey", "808080"),
    ("honeydew", "f0fff0"),
    ("ivory", "fffff0"),
    ("lavender", "e6e6fa"),
    ("lightblue", "add8e6"),
    ("lightcyan", "e0ffff"),
    ("lightgray", "d3d3d3"),
    ("lightgreen", "90ee90"),
    ("lightgrey", "d3d3d3"),
    ("lightsteelblue", "b0c4de"),
    ("lightyellow", "ffffe0"),
    ("linen", "faf0e6"),
    ("magenta", "ff00ff"),
    ("mintcream", "f5fffa"),
    ("navy", "000080"),
    ("orange", "ffa500"),
    ("pink", "ffc0cb"),
    ("purple", "800080"),
    ("red", "ff0000"),
    ("silver", "c0c0c0"),
    ("skyblue", "87ceeb"),
    ("slategray", "708090"),
    ("slategrey", "708090"),
    ("snow", "fffafa"),
    ("steelblue", "4682b4"),
    ("tan", "d2b48c"),
    ("teal", "008080"),
    ("wheat", "f5deb3"),
    ("white", "ffffff"),
    ("whitesmoke", "f5f5f5"),
    ("yellow", "ffff00"),
];

/// Evenly spaced stops, sampled from the matplotlib/ColorBrewer tables.
const COLORMAPS: &[(&str, &[&str])] = &[
    ("viridis", &["440154", "472d7b", "3b528b", "2c728e", "21918c", "28ae80", "5ec962", "addc30", "fde725"]),
    ("plasma", &["0d0887", "4c02a1", "7e03a8", "a92395", "cc4778", "e56b5d", "f89540", "fdc527", "f0f921"]),
    ("inferno", &["000004", "1f0c48", "550f6d", "88226a", "ba3655", "e35933", "f98e09", "f9cb35", "fcffa4"]),
    ("magma", &["000004", "1c1044", "4f127b", "812581", "b5367a", "e55064", "fb8761", "fec287", "fcfdbf"]),
    ("cividis", &["00224e", "123570", "3b496c", "575d6d", "707173", "8a8678", "a59c74", "c3b369", "fee838"]),
    ("blues", &["f7fbff", "deebf7", "c6dbef", "9ecae1", "6baed6", "4292c6", "2171b5", "08519c", "08306b"]),
    ("greens", &["f7fcf5", "e5f5e0", "c7e9c0", "a1d99b", "74c476", "41ab5d", "238b45", "006d2c", "00441b"]),
    ("reds", &["fff5f0", "fee0d2", "fcbba1", "fc9272", "fb6a4a", "ef3b2c", "cb181d", "a50f15", "67000d"]),
    ("oranges", &["fff5eb", "fee6ce", "fdd0a2", "fdae6b", "fd8d3c", "f16913", "d94801", "a63603", "7f2704"]),
    ("purples", &["fcfbfd", "efedf5", "dadaeb", "bcbddc", "9e9ac8", "807dba", "6a51a3", "54278f", "3f007d"]),
    ("greys", &["ffffff", "f0f0f0", "d9d9d9", "bdbdbd", "969696", "737373", "525252", "252525", "000000"]),
    ("ylorrd", &["ffffcc", "ffeda0", "fed976", "feb24c", "fd8d3c", "fc4e2a", "e31a1c", "bd0026", "800026"]),
    ("ylgnbu", &["ffffd9", "edf8b1", "c7e9b4", "7fcdbb", "41b6c4", "1d91c0", "225ea8", "253494", "081d58"]),
    ("orrd", &["fff7ec", "fee8c8", "fdd49e", "fdbb84", "fc8d59", "ef6548", "d7301f", "b30000", "7f0000"]),
    ("rdylbu", &["a50026", "d73027", "f46d43", "fdae61", "fee090", "ffffbf", "e0f3f8", "abd9e9", "74add1", "4575b4", "313695"]),
    ("coolwarm", &["3b4cc0", "6788ee", "9abbff", "c9d7f0", "edd1c2", "f7a889", "e26952", "b40426"]),
];

/// A piecewise-linear colormap. Names are case-insensitive and accept a `_r`
/// suffix for the reversed map.
#[derive(Debug, Clone, PartialEq)]
pub struct Colormap {
    name: String,
    stops: Vec<Color>,
}

impl Colormap {
    pub fn by_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        let (base, reversed) = match lower.strip_suffix("_r") {
            Some(base) => (base.to_string(), true),
            None => (lower.clone(), false),
        };
        let (_, hexes) = COLORMAPS.iter().find(|(n, _)| *n == base)?;
        let mut stops: Vec<Color> = hexes.iter().filter_map(|h| hex_to_color(h)).collect();
        if reversed {
            stops.reverse();
        }
        Some(Self {
            name: name.to_string(),
            stops,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        COLORMAPS.iter().map(|(n, _)| *n)
    }

    /// Colour at `t` in [0, 1]; out-of-range inputs are clamped.
    pub fn sample(&self, t: f64) -> Color {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let segments = (self.stops.len() - 1) as f64;
        let pos = t * segments;
        let i = (pos.floor() as usize).min(self.stops.len() - 2);
        self.stops[i].lerp(&self.stops[i + 1], pos - i as f64)
    }
}

/// Linear mapping of data values onto [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub vmin: f64,
    pub vmax: f64,
}

impl Normalize {
    pub fn new(vmin: f64, vmax: f64) -> Self {
        Self { vmin, vmax }
    }

    /// Range of the given values, or (0, 1) when there are none.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut range: Option<(f64, f64)> = None;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        match range {
            Some((lo, hi)) => Self::new(lo, hi),
            None => Self::new(0.0, 1.0),
        }
    }

    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.vmax - self.vmin;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.vmin) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colour_notations() {
        assert_eq!(Color::parse("#ff0000").unwrap(), Color::rgb(255, 0, 0));
        assert_eq!(Color::parse("#0f0").unwrap(), Color::rgb(0, 255, 0));
        assert_eq!(Color::parse("AliceBlue").unwrap(), Color::rgb(240, 248, 255));
        assert_eq!(Color::parse("0.8").unwrap(), Color::rgb(204, 204, 204));
        assert_eq!(Color::parse("none").unwrap().a, 0.0);
        let translucent = Color::parse("#00000080").unwrap();
        assert!((translucent.a - 128.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_colours() {
        assert!(Color::parse("#12").is_err());
        assert!(Color::parse("not-a-colour").is_err());
        assert!(Color::parse("1.5").is_err());
    }

    #[test]
    fn colormap_endpoints_and_reversal() {
        let viridis = Colormap::by_name("viridis").unwrap();
        assert_eq!(viridis.sample(0.0).to_hex(), "#440154");
        assert_eq!(viridis.sample(1.0).to_hex(), "#fde725");
        assert_eq!(viridis.sample(7.0).to_hex(), "#fde725");

        let reversed = Colormap::by_name("Viridis_r").unwrap();
        assert_eq!(reversed.sample(0.0).to_hex(), "#fde725");
        assert!(Colormap::by_name("rainbow-unicorn").is_none());
    }

    #[test]
    fn colormap_interpolates_between_stops() {
        let greys = Colormap::by_name("greys").unwrap();
        let mid = greys.sample(0.0625);
        assert!(mid.r < 255 && mid.r > 240);
    }

    #[test]
    fn normalize_handles_degenerate_ranges() {
        let norm = Normalize::from_values(vec![8.0, 10.0, f64::NAN]);
        assert_eq!(norm, Normalize::new(8.0, 10.0));
        assert_eq!(norm.fraction(9.0), 0.5);
        assert_eq!(norm.fraction(100.0), 1.0);

        assert_eq!(Normalize::from_values(Vec::new()), Normalize::new(0.0, 1.0));
        assert_eq!(Normalize::new(3.0, 3.0).fraction(3.0), 0.0);
    }
}
