use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// sRGB color with straight alpha.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn with_alpha(mut self, a: f64) -> Self {
        self.a = a;
        self
    }

    pub fn to_svg_fill(&self) -> String {
        if (self.a - 1.0).abs() < 1e-6 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("rgba({},{},{},{:.3})", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_svg_fill())
    }
}

/// Parses `#rgb`, `#rrggbb` and `#rrggbbaa`.
impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid color '{s}' (expected #rgb, #rrggbb or #rrggbbaa)");
        let hex = s.trim().strip_prefix('#').ok_or_else(bad)?;
        if !hex.is_ascii() {
            return Err(bad());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
        match hex.len() {
            3 => {
                let nib = |i: usize| u8::from_str_radix(&hex[i..=i], 16).map(|v| v * 17).map_err(|_| bad());
                Ok(Self::rgb(nib(0)?, nib(1)?, nib(2)?))
            }
            6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?).with_alpha(f64::from(byte(6)?) / 255.0)),
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Cycle of colors for sum components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Hep2026,
    Tableau10,
    OkabeIto,
}

const HEP2026: [Color; 8] = [
    Color::rgb(0x4c, 0x78, 0xa8),
    Color::rgb(0xf5, 0x85, 0x18),
    Color::rgb(0x54, 0xa2, 0x4b),
    Color::rgb(0xe4, 0x57, 0x56),
    Color::rgb(0x72, 0xb7, 0xb2),
    Color::rgb(0xee, 0xca, 0x3b),
    Color::rgb(0xb2, 0x79, 0xa2),
    Color::rgb(0x9d, 0x75, 0x5d),
];

const TABLEAU10: [Color; 10] = [
    Color::rgb(0x4e, 0x79, 0xa7),
    Color::rgb(0xf2, 0x8e, 0x2b),
    Color::rgb(0xe1, 0x57, 0x59),
    Color::rgb(0x76, 0xb7, 0xb2),
    Color::rgb(0x59, 0xa1, 0x4f),
    Color::rgb(0xed, 0xc9, 0x48),
    Color::rgb(0xb0, 0x7a, 0xa1),
    Color::rgb(0xff, 0x9d, 0xa7),
    Color::rgb(0x9c, 0x75, 0x5f),
    Color::rgb(0xba, 0xb0, 0xab),
];

// Colorblind-safe; black is left out since data points use it.
const OKABE_ITO: [Color; 7] = [
    Color::rgb(0xe6, 0x9f, 0x00),
    Color::rgb(0x56, 0xb4, 0xe9),
    Color::rgb(0x00, 0x9e, 0x73),
    Color::rgb(0xf0, 0xe4, 0x42),
    Color::rgb(0x00, 0x72, 0xb2),
    Color::rgb(0xd5, 0x5e, 0x00),
    Color::rgb(0xcc, 0x79, 0xa7),
];

impl Palette {
    pub fn colors(self) -> &'static [Color] {
        match self {
            Palette::Hep2026 => &HEP2026,
            Palette::Tableau10 => &TABLEAU10,
            Palette::OkabeIto => &OKABE_ITO,
        }
    }

    /// Color of the `i`-th component, wrapping around.
    pub fn nth(self, i: usize) -> Color {
        let colors = self.colors();
        colors[i % colors.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!("#1D4ED8".parse::<Color>().unwrap(), Color::rgb(0x1d, 0x4e, 0xd8));
        assert_eq!("#f0a".parse::<Color>().unwrap(), Color::rgb(0xff, 0x00, 0xaa));
        let c: Color = "#00000080".parse().unwrap();
        assert!((c.a - 128.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_colors() {
        for s in ["1d4ed8", "#12", "#gg0000", "#1234567", "#ééé"] {
            assert!(s.parse::<Color>().is_err(), "{s}");
        }
    }

    #[test]
    fn svg_fill() {
        assert_eq!(Color::rgb(29, 78, 216).to_svg_fill(), "#1d4ed8");
        assert_eq!(Color::rgb(29, 78, 216).with_alpha(0.5).to_svg_fill(), "rgba(29,78,216,0.500)");
    }

    #[test]
    fn palette_wraps() {
        let p = Palette::OkabeIto;
        assert_eq!(p.nth(0), p.nth(p.colors().len()));
        assert_ne!(Palette::Hep2026.nth(0), Palette::Hep2026.nth(1));
    }
}
