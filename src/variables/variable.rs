//! The [`Variable`] record and its write-policy rules.

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::variant::Variant;

use super::crypto::VariableCipher;

/// Which internal category a variable belongs to, per `spec.md` 3.
///
/// A `Builtin` variable's value may only be written through a
/// privileged code path ([`super::VariableStore::override_builtin`] or
/// [`super::VariableStore::override_persisted_builtins`] during
/// deserialization); non-privileged writes fail with
/// [`EngineError::BuiltinReadonly`]. `OverridableBuiltin` behaves like
/// `Builtin` for read purposes but accepts ordinary writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalType {
    /// An ordinary, freely writable variable.
    Normal,
    /// A built-in whose initial value comes from a provider, but which
    /// ordinary writes are still allowed to override.
    OverridableBuiltin,
    /// A built-in whose value only a privileged code path may write.
    Builtin,
}

/// Why a write to a variable is being attempted, used to decide
/// whether [`InternalType::Builtin`]'s read-only rule applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    /// An ordinary, non-privileged write (the default for all public
    /// setters).
    AnyNonBuiltin,
    /// The privileged path used when overriding a builtin directly
    /// (`override_builtin`).
    OverrideBuiltin,
    /// The privileged path used when deserializing a persisted blob
    /// that is allowed to restore builtins (`was_persisted == true`).
    OverridePersistedBuiltins,
}

impl WritePolicy {
    /// `true` if this policy is allowed to write an
    /// [`InternalType::Builtin`] variable.
    #[must_use]
    pub const fn allows_builtin_write(self) -> bool {
        !matches!(self, Self::AnyNonBuiltin)
    }
}

/// One entry in the [`super::VariableStore`].
pub struct Variable {
    /// Original, display-cased name (the folded form is the store's
    /// lookup key, not stored here).
    pub name: String,
    value: VariableValue,
    /// `true` if the string value is encrypted at rest; all accessors
    /// still return plaintext, and logs must redact it with a fixed
    /// mask rather than ever holding the plaintext.
    pub hidden: bool,
    /// `true` if this variable is written into the persisted blob
    /// (`serialize(persisting = true)`).
    pub persisted: bool,
    /// `true` if this variable is not re-expanded when formatted.
    /// Built-ins are implicitly never expanded regardless of this
    /// flag.
    pub literal: bool,
    /// Which write-policy category this variable belongs to.
    pub internal_type: InternalType,
}

enum VariableValue {
    Plain(Variant),
    Encrypted {
        cipher: Arc<VariableCipher>,
        blob: Vec<u8>,
    },
}

impl Variable {
    /// Creates a normal, non-hidden, non-persisted, non-literal
    /// variable with no value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: VariableValue::Plain(Variant::None),
            hidden: false,
            persisted: false,
            literal: false,
            internal_type: InternalType::Normal,
        }
    }

    /// Builder-style constructor for a built-in variable.
    #[must_use]
    pub fn builtin(name: impl Into<String>, overridable: bool) -> Self {
        let mut v = Self::new(name);
        v.internal_type = if overridable {
            InternalType::OverridableBuiltin
        } else {
            InternalType::Builtin
        };
        v
    }

    /// Reads the current value as plaintext, decrypting if hidden.
    ///
    /// # Errors
    /// Propagates decryption failure for hidden variables.
    pub fn value(&self) -> Result<Variant> {
        match &self.value {
            VariableValue::Plain(v) => Ok(v.clone()),
            VariableValue::Encrypted { cipher, blob } => {
                let plaintext = cipher.decrypt(blob)?;
                Ok(Variant::Str(plaintext.to_string()))
            }
        }
    }

    /// Sets the value, applying `hidden`'s encryption policy and
    /// enforcing `policy` against [`InternalType::Builtin`].
    ///
    /// # Errors
    /// Returns [`EngineError::BuiltinReadonly`] if this variable is
    /// [`InternalType::Builtin`] and `policy` is
    /// [`WritePolicy::AnyNonBuiltin`].
    pub fn set(&mut self, value: Variant, policy: WritePolicy, cipher: &Arc<VariableCipher>) -> Result<()> {
        if self.internal_type == InternalType::Builtin && !policy.allows_builtin_write() {
            return Err(EngineError::BuiltinReadonly {
                name: self.name.clone(),
            });
        }

        if self.hidden {
            let plaintext = value.get_string().unwrap_or_default();
            let blob = cipher.encrypt(&plaintext)?;
            self.value = VariableValue::Encrypted {
                cipher: Arc::clone(cipher),
                blob,
            };
        } else {
            self.value = VariableValue::Plain(value);
        }
        Ok(())
    }

    /// Marks this variable hidden, re-encrypting its current value if
    /// it is already set.
    ///
    /// # Errors
    /// Propagates encryption failure.
    pub fn set_hidden(&mut self, hidden: bool, cipher: &Arc<VariableCipher>) -> Result<()> {
        if hidden == self.hidden {
            return Ok(());
        }
        let current = self.value()?;
        self.hidden = hidden;
        if hidden {
            let plaintext = current.get_string().unwrap_or_default();
            let blob = cipher.encrypt(&plaintext)?;
            self.value = VariableValue::Encrypted {
                cipher: Arc::clone(cipher),
                blob,
            };
        } else {
            self.value = VariableValue::Plain(current);
        }
        Ok(())
    }

    /// `true` if this variable is re-expanded during formatting: a
    /// non-literal, non-builtin `Normal`/`OverridableBuiltin` variable.
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        !self.literal && self.internal_type == InternalType::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_write_requires_privileged_policy() {
        let cipher = Arc::new(VariableCipher::new());
        let mut v = Variable::builtin("OSVersion", false);
        let err = v
            .set(Variant::Numeric(1), WritePolicy::AnyNonBuiltin, &cipher)
            .unwrap_err();
        assert!(matches!(err, EngineError::BuiltinReadonly { .. }));

        v.set(Variant::Numeric(1), WritePolicy::OverrideBuiltin, &cipher)
            .unwrap();
        assert_eq!(v.value().unwrap(), Variant::Numeric(1));
    }

    #[test]
    fn overridable_builtin_accepts_ordinary_write() {
        let cipher = Arc::new(VariableCipher::new());
        let mut v = Variable::builtin("SystemLanguageID", true);
        v.set(Variant::Numeric(9), WritePolicy::AnyNonBuiltin, &cipher)
            .unwrap();
        assert_eq!(v.value().unwrap(), Variant::Numeric(9));
    }

    #[test]
    fn hidden_value_round_trips_through_encryption() {
        let cipher = Arc::new(VariableCipher::new());
        let mut v = Variable::new("Secret");
        v.hidden = true;
        v.set(Variant::Str("xyz".to_string()), WritePolicy::AnyNonBuiltin, &cipher)
            .unwrap();
        assert_eq!(v.value().unwrap(), Variant::Str("xyz".to_string()));
    }

    #[test]
    fn normal_nonliteral_variable_is_expandable() {
        let v = Variable::new("First");
        assert!(v.is_expandable());
        let mut literal = Variable::new("Second");
        literal.literal = true;
        assert!(!literal.is_expandable());
        let builtin = Variable::builtin("OSVersion", false);
        assert!(!builtin.is_expandable());
    }
}
