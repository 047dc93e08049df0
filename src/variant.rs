//! The tagged value type backing every variable (C2).
//!
//! A [`Variant`] is `{ None, Numeric(i64), Version(u64), Str(String) }`.
//! Hidden-string *encryption at rest* is a [`crate::variables::Variable`]
//! concern, not a `Variant` concern: a `Variant::Str` always holds
//! plaintext while it is live in memory, which keeps the round-trip law
//! below independent of encryption.
//!
//! Encoding rules (`spec.md` 3):
//! - Numeric <-> String: decimal, signed 64-bit, no leading zeros,
//!   optional leading `-`.
//! - Version <-> String: four dotted 16-bit fields `"a.b.c.d"` packed
//!   high -> low into a 64-bit integer.
//! - Numeric <-> Version: lossless when the numeric value fits in the
//!   version encoding (i.e. is representable as an unsigned 64-bit
//!   quantity); otherwise fails with [`EngineError::TypeMismatch`].
//! - `None`: any typed getter fails with [`EngineError::NotFound`].

use crate::error::{EngineError, Result};

/// Which variant type a value currently holds. Used by
/// [`Variant::change_type`] and by callers that need to name the
/// current/target type in an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantType {
    /// Uninitialized / absent value.
    None,
    /// Signed 64-bit integer.
    Numeric,
    /// Four-field dotted version packed into a `u64`.
    Version,
    /// UTF-8 string.
    Str,
}

impl VariantType {
    const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Numeric => "numeric",
            Self::Version => "version",
            Self::Str => "string",
        }
    }
}

/// A tagged value: none, a signed 64-bit integer, a packed
/// four-field version, or a string.
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    /// No value set.
    None,
    /// Signed 64-bit integer.
    Numeric(i64),
    /// Four 16-bit fields packed high -> low: `a.b.c.d`.
    Version(u64),
    /// UTF-8 string.
    Str(String),
}

impl Default for Variant {
    fn default() -> Self {
        Self::None
    }
}

impl Variant {
    /// The [`VariantType`] tag of the current value.
    #[must_use]
    pub const fn variant_type(&self) -> VariantType {
        match self {
            Self::None => VariantType::None,
            Self::Numeric(_) => VariantType::Numeric,
            Self::Version(_) => VariantType::Version,
            Self::Str(_) => VariantType::Str,
        }
    }

    /// Sets this variant to a numeric value.
    pub fn set_numeric(&mut self, value: i64) {
        *self = Self::Numeric(value);
    }

    /// Sets this variant to a string value.
    pub fn set_string(&mut self, value: impl Into<String>) {
        *self = Self::Str(value.into());
    }

    /// Sets this variant to a packed version value.
    pub fn set_version(&mut self, value: u64) {
        *self = Self::Version(value);
    }

    /// Copies `other`'s value into `self`.
    pub fn set_value(&mut self, other: &Self) {
        *self = other.clone();
    }

    /// Returns an independent copy of this variant.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Converts this variant to `target`'s type in place, per the
    /// encoding rules in `spec.md` 3. Converting to the current type is
    /// a no-op (the identity rule). On failure the variant is reset to
    /// [`Variant::None`], matching "failure sets the variant to none".
    ///
    /// # Errors
    /// Returns [`EngineError::TypeMismatch`] when the conversion is not
    /// representable (e.g. a numeric that does not fit a version, or a
    /// string that is not a valid representation of `target`).
    pub fn change_type(&mut self, target: VariantType) -> Result<()> {
        if self.variant_type() == target {
            return Ok(());
        }
        match self.convert(target) {
            Ok(converted) => {
                *self = converted;
                Ok(())
            }
            Err(e) => {
                *self = Self::None;
                Err(e)
            }
        }
    }

    fn convert(&self, target: VariantType) -> Result<Self> {
        match (self, target) {
            (Self::None, _) => Err(EngineError::NotFound {
                what: "variant value".to_string(),
            }),
            (_, VariantType::None) => Ok(Self::None),

            (Self::Numeric(n), VariantType::Str) => Ok(Self::Str(n.to_string())),
            (Self::Str(s), VariantType::Numeric) => parse_numeric(s).map(Self::Numeric),

            (Self::Version(v), VariantType::Str) => Ok(Self::Str(format_version(*v))),
            (Self::Str(s), VariantType::Version) => parse_version(s).map(Self::Version),

            (Self::Numeric(n), VariantType::Version) => numeric_to_version(*n).map(Self::Version),
            (Self::Version(v), VariantType::Numeric) => version_to_numeric(*v).map(Self::Numeric),

            (Self::Str(s), VariantType::Str) => Ok(Self::Str(s.clone())),
            (Self::Numeric(n), VariantType::Numeric) => Ok(Self::Numeric(*n)),
            (Self::Version(v), VariantType::Version) => Ok(Self::Version(*v)),
        }
    }

    /// Reads this variant as a signed 64-bit integer, converting if
    /// necessary. Does not mutate `self`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the variant is `None`, or
    /// [`EngineError::TypeMismatch`] if the current value cannot be
    /// represented numerically.
    pub fn get_numeric(&self) -> Result<i64> {
        match self {
            Self::None => Err(EngineError::NotFound {
                what: "variant value".to_string(),
            }),
            Self::Numeric(n) => Ok(*n),
            Self::Str(s) => parse_numeric(s),
            Self::Version(v) => version_to_numeric(*v),
        }
    }

    /// Reads this variant as a string, converting if necessary. Does
    /// not mutate `self`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the variant is `None`.
    pub fn get_string(&self) -> Result<String> {
        match self {
            Self::None => Err(EngineError::NotFound {
                what: "variant value".to_string(),
            }),
            Self::Numeric(n) => Ok(n.to_string()),
            Self::Version(v) => Ok(format_version(*v)),
            Self::Str(s) => Ok(s.clone()),
        }
    }

    /// Reads this variant as a packed version, converting if
    /// necessary. Does not mutate `self`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the variant is `None`, or
    /// [`EngineError::TypeMismatch`] if the current value is not a
    /// valid version representation.
    pub fn get_version(&self) -> Result<u64> {
        match self {
            Self::None => Err(EngineError::NotFound {
                what: "variant value".to_string(),
            }),
            Self::Version(v) => Ok(*v),
            Self::Str(s) => parse_version(s),
            Self::Numeric(n) => numeric_to_version(*n),
        }
    }

    /// `true` if this variant holds no value.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

fn parse_numeric(s: &str) -> Result<i64> {
    s.parse::<i64>().map_err(|_| EngineError::TypeMismatch {
        from: "string",
        to: VariantType::Numeric.name(),
    })
}

fn format_version(packed: u64) -> String {
    let a = (packed >> 48) & 0xFFFF;
    let b = (packed >> 32) & 0xFFFF;
    let c = (packed >> 16) & 0xFFFF;
    let d = packed & 0xFFFF;
    format!("{a}.{b}.{c}.{d}")
}

fn parse_version(s: &str) -> Result<u64> {
    let fields: Vec<&str> = s.split('.').collect();
    if fields.len() != 4 {
        return Err(EngineError::TypeMismatch {
            from: "string",
            to: VariantType::Version.name(),
        });
    }
    let mut packed: u64 = 0;
    for field in fields {
        let value: u16 = field.parse().map_err(|_| EngineError::TypeMismatch {
            from: "string",
            to: VariantType::Version.name(),
        })?;
        packed = (packed << 16) | u64::from(value);
    }
    Ok(packed)
}

fn numeric_to_version(n: i64) -> Result<u64> {
    u64::try_from(n).map_err(|_| EngineError::TypeMismatch {
        from: VariantType::Numeric.name(),
        to: VariantType::Version.name(),
    })
}

fn version_to_numeric(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| EngineError::TypeMismatch {
        from: VariantType::Version.name(),
        to: VariantType::Numeric.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_change_type_is_noop() {
        let mut v = Variant::Numeric(42);
        v.change_type(VariantType::Numeric).unwrap();
        assert_eq!(v, Variant::Numeric(42));
    }

    #[test]
    fn numeric_string_round_trip() {
        let mut v = Variant::Numeric(-17);
        v.change_type(VariantType::Str).unwrap();
        assert_eq!(v, Variant::Str("-17".to_string()));
        v.change_type(VariantType::Numeric).unwrap();
        assert_eq!(v, Variant::Numeric(-17));
    }

    #[test]
    fn version_string_round_trip() {
        let mut v = Variant::Version(0x0001_0002_0003_0004);
        v.change_type(VariantType::Str).unwrap();
        assert_eq!(v, Variant::Str("1.2.3.4".to_string()));
        v.change_type(VariantType::Version).unwrap();
        assert_eq!(v, Variant::Version(0x0001_0002_0003_0004));
    }

    #[test]
    fn numeric_version_round_trip_when_lossless() {
        let mut v = Variant::Numeric(1234);
        v.change_type(VariantType::Version).unwrap();
        v.change_type(VariantType::Numeric).unwrap();
        assert_eq!(v, Variant::Numeric(1234));
    }

    #[test]
    fn negative_numeric_to_version_fails_and_resets_to_none() {
        let mut v = Variant::Numeric(-1);
        let err = v.change_type(VariantType::Version).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
        assert!(v.is_none());
    }

    #[test]
    fn none_getters_fail_not_found() {
        let v = Variant::None;
        assert!(matches!(v.get_numeric(), Err(EngineError::NotFound { .. })));
        assert!(matches!(v.get_string(), Err(EngineError::NotFound { .. })));
        assert!(matches!(v.get_version(), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn malformed_version_string_is_type_mismatch() {
        let v = Variant::Str("1.2.3".to_string());
        assert!(matches!(v.get_version(), Err(EngineError::TypeMismatch { .. })));
        let v = Variant::Str("1.2.3.not_a_number".to_string());
        assert!(matches!(v.get_version(), Err(EngineError::TypeMismatch { .. })));
    }

    #[test]
    fn copy_and_set_value_are_independent() {
        let original = Variant::Str("hello".to_string());
        let mut copy = original.copy();
        copy.set_numeric(1);
        assert_eq!(original, Variant::Str("hello".to_string()));
        assert_eq!(copy, Variant::Numeric(1));

        let mut target = Variant::None;
        target.set_value(&original);
        assert_eq!(target, original);
    }
}
