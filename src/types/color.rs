//! Colors: RGB values, palette ids, and nearest-color mapping.
//!
//! Source colors arrive as RGB (from mesh data) or hex strings (from voxel
//! input). Everything downstream of the voxelizer works in palette ids, so
//! units and inventory entries carry a [`ColorId`].

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Palette color identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorId(pub u32);

impl ColorId {
    /// Get the raw id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ColorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a hex color string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid hex color: {0:?}")]
pub struct ColorParseError(pub String);

/// 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

fn hex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^#?([0-9a-fA-F]{6}|[0-9a-fA-F]{3})$").expect("hex color pattern is valid")
    })
}

impl Rgb {
    /// Create a color.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`, `RRGGBB`, `#RGB` or `RGB`.
    pub fn from_hex(s: &str) -> Result<Self, ColorParseError> {
        let err = || ColorParseError(s.to_string());
        let digits = hex_pattern()
            .captures(s.trim())
            .and_then(|caps| caps.get(1))
            .ok_or_else(err)?
            .as_str();

        let expanded: String = if digits.len() == 3 {
            digits.chars().flat_map(|c| [c, c]).collect()
        } else {
            digits.to_string()
        };

        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| err());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Format as `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Squared euclidean distance in RGB space.
    pub fn distance_sq(self, other: Self) -> u32 {
        let d = |a: u8, b: u8| {
            let v = i32::from(a) - i32::from(b);
            (v * v) as u32
        };
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b)
    }

    /// Weighted blend of up to three colors (weights are normalised).
    pub fn blend(colors: &[(Rgb, f64)]) -> Self {
        let total: f64 = colors.iter().map(|(_, w)| w.max(0.0)).sum();
        if total <= f64::EPSILON {
            return colors.first().map(|(c, _)| *c).unwrap_or(Rgb::new(255, 255, 255));
        }
        let channel = |pick: fn(&Rgb) -> u8| {
            let v: f64 = colors
                .iter()
                .map(|(c, w)| f64::from(pick(c)) * w.max(0.0))
                .sum::<f64>()
                / total;
            v.round().clamp(0.0, 255.0) as u8
        };
        Self::new(channel(|c| c.r), channel(|c| c.g), channel(|c| c.b))
    }
}

/// A named palette entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteColor {
    /// Palette id.
    pub id: ColorId,
    /// Human-readable name.
    pub name: String,
    /// Reference RGB.
    pub rgb: Rgb,
}

/// Set of buildable colors, used to quantize source colors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PaletteColor>,
}

/// Built-in brick colors: (id, name, hex).
const STANDARD_COLORS: &[(u32, &str, &str)] = &[
    (0, "Black", "05131D"),
    (1, "Blue", "0055BF"),
    (2, "Green", "237841"),
    (4, "Red", "C91A09"),
    (10, "Bright Green", "4B9F4A"),
    (14, "Yellow", "F2CD37"),
    (15, "White", "FFFFFF"),
    (19, "Tan", "E4CD9E"),
    (25, "Orange", "FE8A18"),
    (28, "Dark Tan", "958A73"),
    (70, "Reddish Brown", "582A12"),
    (71, "Light Bluish Gray", "A0A5A9"),
    (72, "Dark Bluish Gray", "6C6E68"),
    (272, "Dark Blue", "0A3463"),
    (288, "Dark Green", "184632"),
    (320, "Dark Red", "720E0F"),
];

impl Palette {
    /// Create a palette. Entries are kept sorted by id.
    pub fn new(mut entries: Vec<PaletteColor>) -> Self {
        entries.sort_by_key(|e| e.id);
        entries.dedup_by_key(|e| e.id);
        Self { entries }
    }

    /// The built-in brick palette.
    pub fn standard() -> Self {
        let entries = STANDARD_COLORS
            .iter()
            .filter_map(|(id, name, hex)| {
                Rgb::from_hex(hex).ok().map(|rgb| PaletteColor {
                    id: ColorId(*id),
                    name: (*name).to_string(),
                    rgb,
                })
            })
            .collect();
        Self::new(entries)
    }

    /// Closest palette id to an RGB color (lowest id wins ties).
    ///
    /// Returns `None` only for an empty palette.
    pub fn nearest(&self, rgb: Rgb) -> Option<ColorId> {
        self.entries
            .iter()
            .min_by_key(|e| (e.rgb.distance_sq(rgb), e.id))
            .map(|e| e.id)
    }

    /// Closest palette id to a hex string.
    pub fn nearest_hex(&self, hex: &str) -> Result<Option<ColorId>, ColorParseError> {
        Ok(self.nearest(Rgb::from_hex(hex)?))
    }

    /// Look up an entry by id.
    pub fn get(&self, id: ColorId) -> Option<&PaletteColor> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> &[PaletteColor] {
        &self.entries
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::standard()
    }
}
