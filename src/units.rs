//! Physical units, axis descriptions and the default-unit table.
//!
//! A [`UnitQuantity`] is a magnitude times a product of prefixed base units with
//! integer exponents, e.g. `V*ps` or `1/THz`. Only multiplicative algebra is
//! supported: there are no offsets and no symbolic simplification beyond
//! cancelling equal factors.
//!
//! Compatibility is decided on the dimensionality vector over time, length,
//! voltage and current. Frequency is folded into `time^-1` for that purpose, so
//! `1/ps` and `THz` are compatible and a Fourier transformed axis can be
//! expressed in the default frequency unit.

use crate::error::{Result, TerapyError};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::{Div, Mul};
use std::str::FromStr;

/// Base dimensions known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Time,
    Length,
    Frequency,
    Voltage,
    Current,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Time,
        Dimension::Length,
        Dimension::Frequency,
        Dimension::Voltage,
        Dimension::Current,
    ];

    /// Symbol of the unprefixed base unit.
    pub fn symbol(&self) -> &'static str {
        match self {
            Dimension::Time => "s",
            Dimension::Length => "m",
            Dimension::Frequency => "Hz",
            Dimension::Voltage => "V",
            Dimension::Current => "A",
        }
    }

    /// Key used in the main config file (`<units type="…"/>`).
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Time => "time",
            Dimension::Length => "length",
            Dimension::Frequency => "frequency",
            Dimension::Voltage => "voltage",
            Dimension::Current => "current",
        }
    }

    pub fn from_key(key: &str) -> Option<Dimension> {
        Dimension::ALL.into_iter().find(|d| d.key() == key)
    }

    fn from_symbol(symbol: &str) -> Option<Dimension> {
        Dimension::ALL.into_iter().find(|d| d.symbol() == symbol)
    }

    // display order: measured quantities before axes
    fn rank(&self) -> u8 {
        match self {
            Dimension::Voltage => 0,
            Dimension::Current => 1,
            Dimension::Length => 2,
            Dimension::Time => 3,
            Dimension::Frequency => 4,
        }
    }
}

/// SI prefixes from atto to exa, as (symbol, power of ten).
const PREFIXES: [(&str, i8); 16] = [
    ("a", -18),
    ("f", -15),
    ("p", -12),
    ("n", -9),
    ("µ", -6),
    ("μ", -6),
    ("u", -6),
    ("m", -3),
    ("c", -2),
    ("d", -1),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

fn prefix_symbol(power: i8) -> &'static str {
    if power == 0 {
        return "";
    }
    PREFIXES
        .iter()
        .find(|(_, p)| *p == power)
        .map(|(s, _)| *s)
        .unwrap_or("")
}

/// One factor of a unit product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitSymbol {
    /// A prefixed base unit, e.g. `ps` is `Base { Time, -12 }`.
    Base { dimension: Dimension, prefix: i8 },
    /// A unit the registry does not know. Kept verbatim and only compatible with itself.
    Opaque(String),
}

impl UnitSymbol {
    fn si_factor(&self) -> f64 {
        match self {
            UnitSymbol::Base { prefix, .. } => 10f64.powi(*prefix as i32),
            UnitSymbol::Opaque(_) => 1.0,
        }
    }

    fn rank(&self) -> (u8, i8, String) {
        match self {
            UnitSymbol::Base { dimension, prefix } => (dimension.rank(), *prefix, String::new()),
            UnitSymbol::Opaque(text) => (u8::MAX, 0, text.clone()),
        }
    }
}

impl Display for UnitSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitSymbol::Base { dimension, prefix } => {
                write!(f, "{}{}", prefix_symbol(*prefix), dimension.symbol())
            }
            UnitSymbol::Opaque(text) => write!(f, "{text}"),
        }
    }
}

/// Exponent vector used to decide whether two quantities can be converted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dimensionality {
    /// Exponents of time, length, voltage and current (frequency counts as time^-1).
    pub base: [i32; 4],
    pub opaque: BTreeMap<String, i32>,
}

impl Dimensionality {
    pub fn is_dimensionless(&self) -> bool {
        self.base.iter().all(|e| *e == 0) && self.opaque.is_empty()
    }
}

/// A scalar magnitude times a product of prefixed base units.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitQuantity {
    pub magnitude: f64,
    factors: BTreeMap<UnitSymbol, i32>,
}

impl Default for UnitQuantity {
    fn default() -> Self {
        UnitQuantity::dimensionless()
    }
}

impl UnitQuantity {
    pub fn dimensionless() -> UnitQuantity {
        UnitQuantity {
            magnitude: 1.0,
            factors: BTreeMap::new(),
        }
    }

    /// A single prefixed base unit, `prefix` being the power of ten.
    pub fn base(dimension: Dimension, prefix: i8) -> UnitQuantity {
        let mut factors = BTreeMap::new();
        factors.insert(UnitSymbol::Base { dimension, prefix }, 1);
        UnitQuantity {
            magnitude: 1.0,
            factors,
        }
    }

    /// A unit the registry does not understand, kept as text.
    pub fn opaque(text: &str) -> UnitQuantity {
        let mut factors = BTreeMap::new();
        factors.insert(UnitSymbol::Opaque(text.to_string()), 1);
        UnitQuantity {
            magnitude: 1.0,
            factors,
        }
    }

    /// Parses a unit expression such as `V/THz`, `mm^2` or `1e3 ps`.
    pub fn parse(text: &str) -> Result<UnitQuantity> {
        parse(text)
    }

    /// Parses `text`, falling back to an opaque unit when it is not understood.
    pub fn parse_lossy(text: &str) -> UnitQuantity {
        match parse(text) {
            Ok(q) => q,
            Err(err) => {
                log::warn!("{err}, keeping \"{text}\" as a plain label");
                UnitQuantity::opaque(text.trim())
            }
        }
    }

    pub fn factors(&self) -> impl Iterator<Item = (&UnitSymbol, i32)> {
        self.factors.iter().map(|(s, e)| (s, *e))
    }

    pub fn is_dimensionless(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn dimensionality(&self) -> Dimensionality {
        let mut dims = Dimensionality::default();
        for (symbol, exp) in &self.factors {
            match symbol {
                UnitSymbol::Base { dimension, .. } => match dimension {
                    Dimension::Time => dims.base[0] += exp,
                    Dimension::Frequency => dims.base[0] -= exp,
                    Dimension::Length => dims.base[1] += exp,
                    Dimension::Voltage => dims.base[2] += exp,
                    Dimension::Current => dims.base[3] += exp,
                },
                UnitSymbol::Opaque(text) => {
                    *dims.opaque.entry(text.clone()).or_insert(0) += exp;
                }
            }
        }
        dims.opaque.retain(|_, e| *e != 0);
        dims
    }

    pub fn is_compatible(&self, other: &UnitQuantity) -> bool {
        self.dimensionality() == other.dimensionality()
    }

    /// Value of one of these units expressed in unprefixed SI base units.
    pub fn si_factor(&self) -> f64 {
        self.factors
            .iter()
            .fold(self.magnitude, |acc, (s, e)| acc * s.si_factor().powi(*e))
    }

    /// Factor `s` with `value_in_other = s * value_in_self`, if compatible.
    pub fn scale_to(&self, other: &UnitQuantity) -> Option<f64> {
        if self.is_compatible(other) {
            Some(self.si_factor() / other.si_factor())
        } else {
            None
        }
    }

    pub fn powi(&self, exp: i32) -> UnitQuantity {
        let mut out = UnitQuantity {
            magnitude: self.magnitude.powi(exp),
            factors: BTreeMap::new(),
        };
        for (s, e) in &self.factors {
            out.add_factor(s.clone(), e * exp);
        }
        out
    }

    pub fn inverse(&self) -> UnitQuantity {
        self.powi(-1)
    }

    /// Same unit product with magnitude reset to 1.
    pub fn unit(&self) -> UnitQuantity {
        UnitQuantity {
            magnitude: 1.0,
            factors: self.factors.clone(),
        }
    }

    fn add_factor(&mut self, symbol: UnitSymbol, exp: i32) {
        let entry = self.factors.entry(symbol.clone()).or_insert(0);
        *entry += exp;
        if *entry == 0 {
            self.factors.remove(&symbol);
        }
    }
}

impl Mul for &UnitQuantity {
    type Output = UnitQuantity;

    fn mul(self, rhs: &UnitQuantity) -> UnitQuantity {
        let mut out = self.clone();
        out.magnitude *= rhs.magnitude;
        for (s, e) in &rhs.factors {
            out.add_factor(s.clone(), *e);
        }
        out
    }
}

impl Div for &UnitQuantity {
    type Output = UnitQuantity;

    fn div(self, rhs: &UnitQuantity) -> UnitQuantity {
        self * &rhs.inverse()
    }
}

impl Display for UnitQuantity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format(self))
    }
}

impl FromStr for UnitQuantity {
    type Err = TerapyError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

fn parse_symbol(symbol: &str) -> Result<UnitQuantity> {
    if let Some(dimension) = Dimension::from_symbol(symbol) {
        return Ok(UnitQuantity::base(dimension, 0));
    }
    for (prefix, power) in PREFIXES {
        if let Some(rest) = symbol.strip_prefix(prefix) {
            if let Some(dimension) = Dimension::from_symbol(rest) {
                return Ok(UnitQuantity::base(dimension, power));
            }
        }
    }
    Err(TerapyError::UnknownUnit(symbol.to_string()))
}

fn parse_factor(token: &str) -> Result<UnitQuantity> {
    if let Ok(number) = token.parse::<f64>() {
        if !number.is_finite() {
            return Err(TerapyError::UnknownUnit(token.to_string()));
        }
        return Ok(UnitQuantity {
            magnitude: number,
            factors: BTreeMap::new(),
        });
    }
    let (symbol, exp) = match token.split_once('^') {
        Some((symbol, exp)) => {
            let exp = exp
                .parse::<i32>()
                .map_err(|_| TerapyError::UnknownUnit(token.to_string()))?;
            (symbol, exp)
        }
        None => (token, 1),
    };
    Ok(parse_symbol(symbol)?.powi(exp))
}

/// Parses a unit expression.
///
/// Factors are separated by `*`, `·` or whitespace; `/` divides by the factor
/// that follows it. Exponents are written `^n` or `**n`. An empty string and
/// `1` are dimensionless.
pub fn parse(text: &str) -> Result<UnitQuantity> {
    let normalized = text.trim().replace("**", "^").replace('·', "*");
    let mut result = UnitQuantity::dimensionless();
    let mut divide = false;
    let mut token = String::new();

    let flush = |token: &mut String, divide: &mut bool, result: &mut UnitQuantity| -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        let factor = parse_factor(token)?;
        *result = if *divide {
            &*result / &factor
        } else {
            &*result * &factor
        };
        *divide = false;
        token.clear();
        Ok(())
    };

    for c in normalized.chars() {
        match c {
            '*' => flush(&mut token, &mut divide, &mut result)?,
            '/' => {
                flush(&mut token, &mut divide, &mut result)?;
                divide = true;
            }
            c if c.is_whitespace() => flush(&mut token, &mut divide, &mut result)?,
            '(' | ')' => return Err(TerapyError::UnknownUnit(text.to_string())),
            c => token.push(c),
        }
    }
    flush(&mut token, &mut divide, &mut result)?;
    // `1/0` overflows even though every factor is finite
    if divide || !result.magnitude.is_finite() {
        return Err(TerapyError::UnknownUnit(text.to_string()));
    }
    Ok(result)
}

/// Canonical text form: positive exponents joined by `*`, then each negative
/// exponent after a `/`. Dimensionless quantities with magnitude 1 format as
/// the empty string.
pub fn format(q: &UnitQuantity) -> String {
    let mut factors: Vec<(&UnitSymbol, i32)> = q.factors().collect();
    factors.sort_by_key(|(s, _)| s.rank());

    let render = |s: &UnitSymbol, e: i32| {
        if e == 1 {
            s.to_string()
        } else {
            format!("{s}^{e}")
        }
    };

    let numerator: Vec<String> = factors
        .iter()
        .filter(|(_, e)| *e > 0)
        .map(|(s, e)| render(s, *e))
        .collect();
    let denominator: Vec<String> = factors
        .iter()
        .filter(|(_, e)| *e < 0)
        .map(|(s, e)| render(s, -e))
        .collect();

    let mut out = String::new();
    if q.magnitude != 1.0 {
        out.push_str(&q.magnitude.to_string());
        if !factors.is_empty() {
            out.push(' ');
        }
    }
    if numerator.is_empty() && !denominator.is_empty() && q.magnitude == 1.0 {
        out.push('1');
    }
    out.push_str(&numerator.join("*"));
    for d in denominator {
        out.push('/');
        out.push_str(&d);
    }
    out
}

/// Name and unit of one axis (or of the measured quantity).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AxisInfo {
    pub name: String,
    pub units: UnitQuantity,
}

impl AxisInfo {
    pub fn new(name: impl Into<String>, units: UnitQuantity) -> AxisInfo {
        AxisInfo {
            name: name.into(),
            units,
        }
    }

    /// Builds an axis from a unit string, keeping unknown units as labels.
    pub fn parse(name: impl Into<String>, units: &str) -> AxisInfo {
        AxisInfo::new(name, UnitQuantity::parse_lossy(units))
    }

    pub fn dimensionless(name: impl Into<String>) -> AxisInfo {
        AxisInfo::new(name, UnitQuantity::dimensionless())
    }
}

impl Display for AxisInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.units.is_dimensionless() && self.units.magnitude == 1.0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.units)
        }
    }
}

/// Converts `old` into `new`, axis by axis.
///
/// For every compatible pair the returned entry is the factor `s` with
/// `value_new = s * value_old`, and `old[i]` is replaced by `new[i]`. For an
/// incompatible pair the result depends on `ask`: with `ask` set the entry is
/// `None` and `old[i]` is kept so the caller can decide; otherwise the new unit
/// is accepted verbatim with a factor of 1. Entries of `new` beyond the length
/// of `old` are appended.
pub fn convert(old: &mut Vec<AxisInfo>, new: &[AxisInfo], ask: bool) -> Vec<Option<f64>> {
    let mut scales = Vec::with_capacity(new.len());
    for (i, target) in new.iter().enumerate() {
        if i >= old.len() {
            old.push(target.clone());
            scales.push(Some(1.0));
            continue;
        }
        match old[i].units.scale_to(&target.units) {
            Some(scale) => {
                old[i] = target.clone();
                scales.push(Some(scale));
            }
            None if ask => {
                log::warn!(
                    "{}",
                    TerapyError::IncompatibleUnits {
                        from: old[i].units.to_string(),
                        to: target.units.to_string(),
                    }
                );
                scales.push(None);
            }
            None => {
                old[i] = target.clone();
                scales.push(Some(1.0));
            }
        }
    }
    scales
}

/// Default unit per dimension, used to normalize derived units.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultUnits {
    units: BTreeMap<Dimension, UnitQuantity>,
}

impl Default for DefaultUnits {
    fn default() -> Self {
        let mut units = BTreeMap::new();
        units.insert(Dimension::Time, UnitQuantity::base(Dimension::Time, -12));
        units.insert(Dimension::Frequency, UnitQuantity::base(Dimension::Frequency, 12));
        units.insert(Dimension::Length, UnitQuantity::base(Dimension::Length, -3));
        units.insert(Dimension::Voltage, UnitQuantity::base(Dimension::Voltage, 0));
        units.insert(Dimension::Current, UnitQuantity::base(Dimension::Current, -9));
        DefaultUnits { units }
    }
}

impl DefaultUnits {
    pub fn get(&self, dimension: Dimension) -> UnitQuantity {
        self.units
            .get(&dimension)
            .cloned()
            .unwrap_or_else(|| UnitQuantity::base(dimension, 0))
    }

    /// Sets the default for `dimension`. The unit must be a single factor of that dimension.
    pub fn set(&mut self, dimension: Dimension, units: UnitQuantity) -> Result<()> {
        if !units.is_compatible(&UnitQuantity::base(dimension, 0)) {
            return Err(TerapyError::IncompatibleUnits {
                from: units.to_string(),
                to: dimension.key().to_string(),
            });
        }
        self.units.insert(dimension, units.unit());
        Ok(())
    }

    /// Sets a default from a config entry such as `type="time" symbol="fs"`.
    pub fn set_from_config(&mut self, key: &str, symbol: &str) -> Result<()> {
        let dimension = Dimension::from_key(key)
            .ok_or_else(|| TerapyError::ConfigParseError(format!("unknown unit type \"{key}\"")))?;
        self.set(dimension, parse(symbol)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &UnitQuantity)> {
        self.units.iter().map(|(d, u)| (*d, u))
    }

    /// Re-expresses `q` over the default units.
    ///
    /// Negative time exponents are written with the default frequency unit and
    /// pairs like `ps/ps` cancel. The magnitude absorbs the conversion so that
    /// `normalize(q).si_factor() == q.si_factor()`.
    pub fn normalize(&self, q: &UnitQuantity) -> UnitQuantity {
        let dims = q.dimensionality();
        let mut out = UnitQuantity::dimensionless();
        let [time, length, voltage, current] = dims.base;
        if time < 0 {
            out = &out * &self.get(Dimension::Frequency).powi(-time);
        } else if time > 0 {
            out = &out * &self.get(Dimension::Time).powi(time);
        }
        out = &out * &self.get(Dimension::Length).powi(length);
        out = &out * &self.get(Dimension::Voltage).powi(voltage);
        out = &out * &self.get(Dimension::Current).powi(current);
        for (text, exp) in dims.opaque {
            out = &out * &UnitQuantity::opaque(&text).powi(exp);
        }
        let unit = out.unit();
        UnitQuantity {
            magnitude: q.si_factor() / unit.si_factor(),
            factors: unit.factors,
        }
    }

    /// Normalizes every axis of `axes`, returning the scale factor per axis.
    pub fn normalize_axes(&self, axes: &[AxisInfo]) -> (Vec<AxisInfo>, Vec<f64>) {
        axes.iter()
            .map(|a| {
                let n = self.normalize(&a.units);
                let scale = n.magnitude;
                (AxisInfo::new(a.name.clone(), n.unit()), scale)
            })
            .unzip()
    }
}
