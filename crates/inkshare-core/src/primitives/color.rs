//! Stroke colors as they travel through the log.

use peniko::Color;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Serializable color representation (RGBA8).
///
/// On the wire this is a CSS hex string: `#rrggbb` when opaque,
/// `#rrggbbaa` otherwise. `#rgb` shorthand is accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    pub fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    /// Format as a CSS hex string.
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for SerializableColor {
    fn default() -> Self {
        Self::black()
    }
}

impl fmt::Display for SerializableColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when a color string is not a recognised hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color `{0}`")]
pub struct ParseColorError(pub String);

impl FromStr for SerializableColor {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(err)?;
        if !hex.is_ascii() {
            return Err(err());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
        match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (slot, c) in out.iter_mut().zip(hex.chars()) {
                    let v = c.to_digit(16).ok_or_else(err)? as u8;
                    *slot = v * 17;
                }
                Ok(Self::rgb(out[0], out[1], out[2]))
            }
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => Err(err()),
        }
    }
}

impl Serialize for SerializableColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SerializableColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_long_and_short_forms() {
        assert_eq!("#ff0000".parse::<SerializableColor>().unwrap(), SerializableColor::rgb(255, 0, 0));
        assert_eq!("#0f0".parse::<SerializableColor>().unwrap(), SerializableColor::rgb(0, 255, 0));
        assert_eq!(
            "#00000080".parse::<SerializableColor>().unwrap(),
            SerializableColor::new(0, 0, 0, 128)
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("red".parse::<SerializableColor>().is_err());
        assert!("#12345".parse::<SerializableColor>().is_err());
        assert!("#gg0000".parse::<SerializableColor>().is_err());
        assert!("#ééé".parse::<SerializableColor>().is_err());
    }

    #[test]
    fn test_opaque_colors_format_without_alpha() {
        assert_eq!(SerializableColor::rgb(18, 52, 86).to_hex(), "#123456");
        assert_eq!(SerializableColor::new(18, 52, 86, 0).to_hex(), "#12345600");
    }

    #[test]
    fn test_converts_to_peniko() {
        let color: Color = SerializableColor::rgb(1, 2, 3).into();
        let back: SerializableColor = color.into();
        assert_eq!(back, SerializableColor::rgb(1, 2, 3));
    }
}
