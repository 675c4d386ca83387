//! Minimal physical unit handling for climate variables
//!
//! Units are parsed from the CF-style strings found in dataset attributes
//! (`"K"`, `"degC"`, `"kg m-2 s-1"`, `"mm/day"`, `"%"`). Every unit is reduced to
//! a [`Dimension`] plus an affine mapping onto SI base units, which is enough
//! to convert between compatible units and to turn precipitation rates into
//! amounts. Water mass is folded into length with a density of 1000 kg m-3,
//! so `kg m-2` and `mm` are the same quantity.

use std::fmt;

use crate::errors::{ClimIndError, Result};

/// Physical dimension of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Absolute temperature (K, degC, degF)
    Temperature,
    /// Temperature difference (delta_degC, delta_degF)
    TemperatureDelta,
    /// Product of length and time powers, `(0, 0)` being dimensionless
    Physical { length: i32, time: i32 },
}

/// A parsed unit: `base_value = value * scale + offset`
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    symbol: String,
    dimension: Dimension,
    scale: f64,
    offset: f64,
    factors: Vec<(String, i32)>,
}

/// Affine conversion between two units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub scale: f64,
    pub offset: f64,
}

impl Conversion {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    #[must_use]
    pub fn is_identity(self) -> bool {
        (self.scale - 1.0).abs() < 1e-12 && self.offset.abs() < 1e-12
    }
}

const SECONDS_PER_DAY: f64 = 86_400.0;
const CELSIUS_OFFSET: f64 = 273.15;
const FAHRENHEIT_SCALE: f64 = 5.0 / 9.0;

fn temperature(symbol: &str) -> Option<(Dimension, f64, f64)> {
    let parsed = match symbol {
        "K" | "kelvin" | "Kelvin" | "degK" | "degree_Kelvin" => (Dimension::Temperature, 1.0, 0.0),
        "degC" | "°C" | "C" | "deg_C" | "celsius" | "Celsius" | "degree_Celsius" | "degrees_Celsius" => {
            (Dimension::Temperature, 1.0, CELSIUS_OFFSET)
        }
        "degF" | "°F" | "F" | "fahrenheit" | "Fahrenheit" | "degree_Fahrenheit" => (
            Dimension::Temperature,
            FAHRENHEIT_SCALE,
            CELSIUS_OFFSET - 32.0 * FAHRENHEIT_SCALE,
        ),
        "delta_degC" | "delta_degree_Celsius" => (Dimension::TemperatureDelta, 1.0, 0.0),
        "delta_degF" | "delta_degree_Fahrenheit" => {
            (Dimension::TemperatureDelta, FAHRENHEIT_SCALE, 0.0)
        }
        _ => return None,
    };
    Some(parsed)
}

/// Length/time powers and SI scale of a single named factor
fn factor(name: &str) -> Option<(i32, i32, f64)> {
    let parsed = match name {
        "mm" => (1, 0, 1e-3),
        "cm" => (1, 0, 1e-2),
        "m" | "meter" | "metre" => (1, 0, 1.0),
        "km" => (1, 0, 1e3),
        // liquid water: 1 kg is 1e-3 m3
        "kg" => (3, 0, 1e-3),
        "g" => (3, 0, 1e-6),
        "s" | "sec" | "second" | "seconds" => (0, 1, 1.0),
        "min" | "minute" | "minutes" => (0, 1, 60.0),
        "h" | "hr" | "hour" | "hours" => (0, 1, 3600.0),
        "d" | "day" | "days" => (0, 1, SECONDS_PER_DAY),
        _ => return None,
    };
    Some(parsed)
}

fn split_exponent(token: &str) -> Result<(&str, i32)> {
    let unknown = || ClimIndError::UnknownUnit {
        unit: token.to_string(),
    };
    let cut = token
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit() || *c == '-' || *c == '+' || *c == '^')
        .map_or(token.len(), |(i, _)| i);
    let (name, rest) = token.split_at(cut);
    if rest.is_empty() {
        return Ok((name, 1));
    }
    let exponent = rest.trim_start_matches('^');
    exponent.parse::<i32>().map(|e| (name, e)).map_err(|_| unknown())
}

impl Unit {
    /// Parse a unit string
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::UnknownUnit`] when a factor is not recognised.
    pub fn parse(symbol: &str) -> Result<Self> {
        let trimmed = symbol.trim();
        match trimmed {
            "" | "1" | "dimensionless" => return Ok(Self::dimensionless(trimmed, 1.0)),
            "%" | "percent" | "pct" => return Ok(Self::dimensionless(trimmed, 0.01)),
            _ => {}
        }
        if let Some((dimension, scale, offset)) = temperature(trimmed) {
            return Ok(Self {
                symbol: trimmed.to_string(),
                dimension,
                scale,
                offset,
                factors: vec![(trimmed.to_string(), 1)],
            });
        }

        let normalized = trimmed.replace("**", "^");
        let mut tokens: Vec<(String, bool)> = Vec::new();
        let mut current = String::new();
        let mut invert_next = false;
        for c in normalized.chars() {
            if c.is_whitespace() || c == '*' || c == '.' || c == '/' {
                if !current.is_empty() {
                    tokens.push((std::mem::take(&mut current), invert_next));
                    invert_next = false;
                }
                if c == '/' {
                    invert_next = true;
                }
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push((current, invert_next));
        }

        let mut length = 0;
        let mut time = 0;
        let mut scale = 1.0;
        let mut factors = Vec::with_capacity(tokens.len());
        for (token, inverted) in tokens {
            let (name, exponent) = split_exponent(&token)?;
            let exponent = if inverted { -exponent } else { exponent };
            if name.is_empty() && exponent == 1 {
                continue;
            }
            let (l, t, s) = factor(name).ok_or_else(|| ClimIndError::UnknownUnit {
                unit: symbol.to_string(),
            })?;
            length += l * exponent;
            time += t * exponent;
            scale *= s.powi(exponent);
            factors.push((name.to_string(), exponent));
        }
        Ok(Self {
            symbol: trimmed.to_string(),
            dimension: Dimension::Physical { length, time },
            scale,
            offset: 0.0,
            factors,
        })
    }

    fn dimensionless(symbol: &str, scale: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            dimension: Dimension::Physical { length: 0, time: 0 },
            scale,
            offset: 0.0,
            factors: Vec::new(),
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub const fn dimension(&self) -> Dimension {
        self.dimension
    }

    #[must_use]
    pub fn is_dimensionless(&self) -> bool {
        self.dimension == Dimension::Physical { length: 0, time: 0 }
    }

    /// Something per unit of time, such as a precipitation flux
    #[must_use]
    pub fn is_rate(&self) -> bool {
        matches!(self.dimension, Dimension::Physical { time: -1, .. })
    }

    /// A length or water-equivalent accumulation
    #[must_use]
    pub fn is_amount(&self) -> bool {
        matches!(self.dimension, Dimension::Physical { length, time: 0 } if length != 0)
    }

    /// True when both units describe the same quantity on the same scale
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && (self.scale - other.scale).abs() <= 1e-12 * self.scale.abs().max(1.0)
            && (self.offset - other.offset).abs() <= 1e-9
    }

    /// Conversion from `self` to `target`
    ///
    /// Temperature differences can be expressed in an absolute temperature
    /// unit, in which case only the scale applies.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::IncompatibleUnits`] when dimensions differ.
    pub fn conversion_to(&self, target: &Self) -> Result<Conversion> {
        use Dimension::{Temperature, TemperatureDelta};
        let (offset_from, offset_to) = match (self.dimension, target.dimension) {
            (a, b) if a == b => (self.offset, target.offset),
            (TemperatureDelta, Temperature) | (Temperature, TemperatureDelta) => (0.0, 0.0),
            _ => {
                return Err(ClimIndError::IncompatibleUnits {
                    from: self.symbol.clone(),
                    to: target.symbol.clone(),
                })
            }
        };
        Ok(Conversion {
            scale: self.scale / target.scale,
            offset: (offset_from - offset_to) / target.scale,
        })
    }

    /// Unit of a difference between two values expressed in `self`
    #[must_use]
    pub fn delta(&self) -> Self {
        if self.dimension != Dimension::Temperature || self.offset == 0.0 {
            return self.clone();
        }
        let symbol = if (self.scale - 1.0).abs() < 1e-12 {
            "delta_degC"
        } else {
            "delta_degF"
        };
        Self {
            symbol: symbol.to_string(),
            dimension: Dimension::TemperatureDelta,
            scale: self.scale,
            offset: 0.0,
            factors: vec![(symbol.to_string(), 1)],
        }
    }

    /// Amount unit obtained by integrating this rate over time.
    ///
    /// `"kg m-2 s-1"` becomes `"kg m-2"`, `"mm/day"` becomes `"mm"`. Returns the
    /// amount unit together with the factor to apply to values sampled every
    /// `step_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when `self` is not a rate.
    pub fn to_amount(&self, step_seconds: f64) -> Result<(Self, f64)> {
        if !self.is_rate() {
            return Err(ClimIndError::invalid(format!(
                "'{}' is not a rate and cannot be turned into an amount",
                self.symbol
            )));
        }
        let kept: Vec<(String, i32)> = self
            .factors
            .iter()
            .filter(|(name, _)| factor(name).map_or(true, |(_, t, _)| t == 0))
            .cloned()
            .collect();
        let symbol = kept
            .iter()
            .map(|(name, e)| if *e == 1 { name.clone() } else { format!("{name}{e}") })
            .collect::<Vec<_>>()
            .join(" ");
        let amount = Self::parse(&symbol)?;
        let factor = self.scale * step_seconds / amount.scale;
        Ok((amount, factor))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

impl std::str::FromStr for Unit {
    type Err = ClimIndError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Convert a single value between two unit strings
///
/// # Errors
///
/// Returns an error when either unit is unknown or they are incompatible.
pub fn convert_value(value: f64, from: &str, to: &str) -> Result<f64> {
    let conversion = Unit::parse(from)?.conversion_to(&Unit::parse(to)?)?;
    Ok(conversion.apply(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn temperature_conversions() {
        assert_abs_diff_eq!(convert_value(303.15, "K", "degC").unwrap(), 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(convert_value(0.0, "degC", "degF").unwrap(), 32.0, epsilon = 1e-9);
        assert_abs_diff_eq!(convert_value(25.0, "°C", "K").unwrap(), 298.15, epsilon = 1e-9);
    }

    #[test]
    fn deltas_ignore_offsets() {
        let degc = Unit::parse("degC").unwrap();
        assert_eq!(degc.delta().symbol(), "delta_degC");
        assert_eq!(Unit::parse("K").unwrap().delta().symbol(), "K");
        assert_abs_diff_eq!(convert_value(5.0, "delta_degC", "K").unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn precipitation_flux_to_amount() {
        let flux = Unit::parse("kg m-2 s-1").unwrap();
        assert!(flux.is_rate());
        let (amount, factor) = flux.to_amount(SECONDS_PER_DAY).unwrap();
        assert_eq!(amount.symbol(), "kg m-2");
        assert!(amount.is_amount());
        assert_abs_diff_eq!(factor, 86_400.0, epsilon = 1e-6);
        assert!(amount.is_equivalent(&Unit::parse("mm").unwrap()));

        let (amount, factor) = Unit::parse("mm/day").unwrap().to_amount(SECONDS_PER_DAY).unwrap();
        assert_eq!(amount.symbol(), "mm");
        assert_abs_diff_eq!(factor, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn exponent_spellings() {
        let a = Unit::parse("kg m-2 s-1").unwrap();
        let b = Unit::parse("kg m^-2 s^-1").unwrap();
        let c = Unit::parse("kg/m**2/s").unwrap();
        assert!(a.is_equivalent(&b));
        assert!(a.is_equivalent(&c));
        assert_abs_diff_eq!(convert_value(1.0, "mm/day", "mm d-1").unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn percent_and_ratio() {
        assert_abs_diff_eq!(convert_value(0.25, "1", "%").unwrap(), 25.0, epsilon = 1e-12);
        assert!(Unit::parse("%").unwrap().is_dimensionless());
    }

    #[test]
    fn unknown_and_incompatible() {
        assert!(matches!(Unit::parse("parsec"), Err(ClimIndError::UnknownUnit { .. })));
        assert!(matches!(
            convert_value(1.0, "K", "mm"),
            Err(ClimIndError::IncompatibleUnits { .. })
        ));
    }
}
