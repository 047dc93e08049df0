//! The variable store (C3, `spec.md` 4.3).
//!
//! [`VariableStore`] owns every variable the engine knows about behind
//! a single `Mutex<BTreeMap<FoldedKey, Variable>>`. Formatting a
//! string can itself read other variables recursively
//! ([`format::format`] calls back into [`VariableLookup::formatted_value`]
//! for every `[NAME]` it finds), so the lock is taken once per public
//! call and held for the whole operation; the recursive lookup only
//! ever needs shared access to the already-seeded map, so there is no
//! re-entrant locking and no need to mutate the map mid-expansion.
//! Built-in values are computed on demand from [`KnownFolders`] /
//! [`HostInfo`] rather than cached in the map, since both collaborators
//! are cheap, pure lookups in practice (environment reads, not network
//! calls).

pub mod builtins;
pub mod crypto;
pub mod fold;
pub mod format;
pub mod serialize;
pub mod variable;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, Result};
use crate::variant::Variant;

use builtins::{resolve_builtin, HostInfo, KnownFolders};
use crypto::VariableCipher;
use fold::FoldedKey;
use format::VariableLookup;
use serialize::SerializedVariable;
use variable::{InternalType, Variable, WritePolicy};

/// Owns the full variable namespace for one engine instance.
pub struct VariableStore {
    inner: Mutex<BTreeMap<FoldedKey, Variable>>,
    cipher: Arc<VariableCipher>,
}

impl VariableStore {
    /// Creates an empty store. Built-ins are not pre-populated; a read
    /// of a built-in name that has no explicit entry falls through to
    /// [`builtins::resolve_builtin`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            cipher: Arc::new(VariableCipher::new()),
        }
    }

    /// Reads `name`'s raw [`Variant`] from `map`, falling back to the
    /// built-in catalogue when no explicit entry exists or the
    /// existing entry is unset.
    fn lookup_variant(
        map: &BTreeMap<FoldedKey, Variable>,
        name: &str,
        folders: &dyn KnownFolders,
        host: &dyn HostInfo,
    ) -> Result<Variant> {
        if let Some(var) = map.get(&FoldedKey::new(name)) {
            let value = var.value()?;
            if !value.is_none() {
                return Ok(value);
            }
        }
        resolve_builtin(name, folders, host)
    }

    fn lookup_is_hidden(map: &BTreeMap<FoldedKey, Variable>, name: &str) -> bool {
        map.get(&FoldedKey::new(name)).is_some_and(|v| v.hidden)
    }

    fn lookup_is_literal_or_builtin(map: &BTreeMap<FoldedKey, Variable>, name: &str) -> bool {
        map.get(&FoldedKey::new(name))
            .is_some_and(|v| v.literal || v.internal_type != InternalType::Normal)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<FoldedKey, Variable>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Reads `name` as a numeric value, using production host
    /// collaborators for built-in resolution.
    ///
    /// # Errors
    /// See [`Self::get_variant`].
    pub fn get_numeric(&self, name: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<i64> {
        self.get_variant(name, folders, host)?.get_numeric()
    }

    /// Reads `name` as a string value.
    ///
    /// # Errors
    /// See [`Self::get_variant`].
    pub fn get_string(&self, name: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<String> {
        self.get_variant(name, folders, host)?.get_string()
    }

    /// Reads `name` as a packed version value.
    ///
    /// # Errors
    /// See [`Self::get_variant`].
    pub fn get_version(&self, name: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<u64> {
        self.get_variant(name, folders, host)?.get_version()
    }

    /// Reads `name`'s raw [`Variant`], resolving it as a built-in if no
    /// explicit value has been set.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if no variable or built-in by
    /// that name exists.
    pub fn get_variant(&self, name: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<Variant> {
        let map = self.lock();
        Self::lookup_variant(&map, name, folders, host)
    }

    /// Formats `name`'s value through [`format::format`], with hidden
    /// variables rendered as plaintext.
    ///
    /// # Errors
    /// Propagates [`EngineError::NotFound`] for a missing reference
    /// anywhere in the recursive expansion.
    pub fn get_formatted(&self, input: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<String> {
        let map = self.lock();
        let lookup = LockedLookup { map: &map, folders, host };
        format::format(input, &lookup, false)
    }

    /// As [`Self::get_formatted`], but hidden variables render as
    /// `*****` instead of their plaintext.
    ///
    /// # Errors
    /// Same as [`Self::get_formatted`].
    pub fn get_formatted_obfuscated(&self, input: &str, folders: &dyn KnownFolders, host: &dyn HostInfo) -> Result<String> {
        let map = self.lock();
        let lookup = LockedLookup { map: &map, folders, host };
        format::format(input, &lookup, true)
    }

    /// Sets `name` to a numeric value.
    ///
    /// # Errors
    /// Returns [`EngineError::BuiltinReadonly`] if `name` is a
    /// [`InternalType::Builtin`] variable and `overwrite_builtin` is
    /// `false`.
    pub fn set_numeric(&self, name: &str, value: i64, overwrite_builtin: bool) -> Result<()> {
        self.set_variant(name, Variant::Numeric(value), overwrite_builtin, false)
    }

    /// Sets `name` to a string value.
    ///
    /// # Errors
    /// See [`Self::set_numeric`].
    pub fn set_string(&self, name: &str, value: impl Into<String>, overwrite_builtin: bool) -> Result<()> {
        self.set_variant(name, Variant::Str(value.into()), overwrite_builtin, false)
    }

    /// Sets `name` to a packed version value.
    ///
    /// # Errors
    /// See [`Self::set_numeric`].
    pub fn set_version(&self, name: &str, value: u64, overwrite_builtin: bool) -> Result<()> {
        self.set_variant(name, Variant::Version(value), overwrite_builtin, false)
    }

    /// Sets `name` to an arbitrary [`Variant`], marking the variable
    /// literal (not recursively re-expanded when formatted).
    ///
    /// # Errors
    /// See [`Self::set_numeric`].
    pub fn set_literal_variant(&self, name: &str, value: Variant, overwrite_builtin: bool) -> Result<()> {
        self.set_variant(name, value, overwrite_builtin, true)
    }

    fn set_variant(&self, name: &str, value: Variant, overwrite_builtin: bool, literal: bool) -> Result<()> {
        let mut map = self.lock();
        let key = FoldedKey::new(name);
        let policy = if overwrite_builtin {
            WritePolicy::OverrideBuiltin
        } else {
            WritePolicy::AnyNonBuiltin
        };
        let var = map.entry(key).or_insert_with(|| Variable::new(name));
        var.set(value, policy, &self.cipher)?;
        if literal {
            var.literal = true;
        }
        Ok(())
    }

    /// Marks `name` as hidden (or not), re-encrypting its current value
    /// as needed.
    ///
    /// # Errors
    /// Propagates encryption/decryption failure.
    pub fn set_hidden(&self, name: &str, hidden: bool) -> Result<()> {
        let mut map = self.lock();
        let key = FoldedKey::new(name);
        let var = map.entry(key).or_insert_with(|| Variable::new(name));
        var.set_hidden(hidden, &self.cipher)
    }

    /// `true` if `name` is a hidden variable. Absent variables report
    /// `false`.
    #[must_use]
    pub fn is_hidden(&self, name: &str) -> bool {
        Self::lookup_is_hidden(&self.lock(), name)
    }

    /// Marks `name` as persisted (written into
    /// `serialize(persisting = true)` blobs). Creates the variable if
    /// absent, with no value set.
    pub fn set_persisted(&self, name: &str, persisted: bool) {
        let mut map = self.lock();
        let key = FoldedKey::new(name);
        let var = map.entry(key).or_insert_with(|| Variable::new(name));
        var.persisted = persisted;
    }

    /// Overrides a [`InternalType::Builtin`] variable's value directly,
    /// bypassing the normal write-policy check. Used by the controller
    /// when it updates engine-managed built-ins
    /// (`BundleAction`, `BundleElevated`, ...).
    ///
    /// # Errors
    /// Propagates encryption failure only; the builtin-readonly check
    /// is intentionally bypassed here.
    pub fn override_builtin(&self, name: &str, value: Variant) -> Result<()> {
        self.set_variant(name, value, true, false)
    }

    /// Seeds the engine's command-line variables
    /// (`BundleCommandLineArgs` and bare `NAME=VALUE` tokens) at
    /// startup. Every seeded variable is literal, matching the source
    /// engine's treatment of command-line-sourced values.
    pub fn import_command_line(&self, raw_command_line: &str, name_value_pairs: &[(String, String)]) {
        let _ = self.set_literal_variant("BundleCommandLineArgs", Variant::Str(raw_command_line.to_string()), true);
        for (name, value) in name_value_pairs {
            let _ = self.set_literal_variant(name, Variant::Str(value.clone()), false);
        }
    }

    /// Serializes every variable this pass should include (per
    /// [`serialize::include_in_serialization`]) across the elevation
    /// boundary.
    ///
    /// # Errors
    /// Propagates hidden-variable decryption failure.
    pub fn serialize(&self, persisting: bool) -> Result<Vec<u8>> {
        let map = self.lock();
        let mut entries = Vec::new();
        for var in map.values() {
            if !serialize::include_in_serialization(var.internal_type, var.persisted, persisting) {
                continue;
            }
            entries.push(SerializedVariable {
                name: var.name.clone(),
                value: var.value()?,
                literal: var.literal,
            });
        }
        Ok(serialize::serialize(&entries))
    }

    /// Applies a blob produced by [`Self::serialize`], writing each
    /// variable back with the write policy appropriate to
    /// `was_persisted`.
    ///
    /// # Errors
    /// Propagates [`EngineError::CorruptFormat`] from a malformed blob
    /// or [`EngineError::BuiltinReadonly`] from a non-persisted blob
    /// that tries to write a builtin.
    pub fn deserialize(&self, bytes: &[u8], was_persisted: bool) -> Result<()> {
        let decoded = serialize::deserialize(bytes)?;
        let mut map = self.lock();
        let policy = if was_persisted {
            WritePolicy::OverridePersistedBuiltins
        } else {
            WritePolicy::AnyNonBuiltin
        };
        for entry in decoded {
            let key = FoldedKey::new(&entry.name);
            let var = map.entry(key).or_insert_with(|| Variable::new(&entry.name));
            var.set(entry.value, policy, &self.cipher)?;
            var.literal = entry.literal;
            if was_persisted {
                var.persisted = true;
            }
        }
        Ok(())
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a locked [`VariableStore`] map into the [`VariableLookup`]
/// trait [`format::format`] needs, so recursive `[NAME]` expansion
/// reads through the same guard the top-level call already holds.
struct LockedLookup<'a> {
    map: &'a BTreeMap<FoldedKey, Variable>,
    folders: &'a dyn KnownFolders,
    host: &'a dyn HostInfo,
}

impl VariableLookup for LockedLookup<'_> {
    fn formatted_value(&self, name: &str) -> Result<String> {
        VariableStore::lookup_variant(self.map, name, self.folders, self.host)?.get_string()
    }

    fn is_hidden(&self, name: &str) -> bool {
        VariableStore::lookup_is_hidden(self.map, name)
    }

    fn is_literal_or_builtin(&self, name: &str) -> bool {
        VariableStore::lookup_is_literal_or_builtin(self.map, name)
    }
}

#[cfg(test)]
mod tests {
    use super::builtins::test_support::{FakeHostInfo, FakeKnownFolders};
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let store = VariableStore::new();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        store.set_string("Foo", "bar", false).unwrap();
        assert_eq!(store.get_string("Foo", &folders, &host).unwrap(), "bar");
    }

    #[test]
    fn get_formatted_expands_nested_variables() {
        let store = VariableStore::new();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        store.set_string("First", "A", false).unwrap();
        store.set_string("Second", "[First]B", false).unwrap();
        let out = store.get_formatted("[Second]C", &folders, &host).unwrap();
        assert_eq!(out, "ABC");
    }

    #[test]
    fn hidden_variable_is_obfuscated_in_formatted_output() {
        let store = VariableStore::new();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        store.set_hidden("Secret", true).unwrap();
        store.set_string("Secret", "xyz", false).unwrap();
        let obfuscated = store.get_formatted_obfuscated("[Secret]", &folders, &host).unwrap();
        assert_eq!(obfuscated, "*****");
        let plain = store.get_formatted("[Secret]", &folders, &host).unwrap();
        assert_eq!(plain, "xyz");
    }

    #[test]
    fn builtin_resolves_from_known_folders_without_explicit_entry() {
        let store = VariableStore::new();
        let mut folders = FakeKnownFolders::default();
        folders.paths.insert("TempFolder", "/tmp/".to_string());
        let host = FakeHostInfo::default();
        assert_eq!(store.get_string("TempFolder", &folders, &host).unwrap(), "/tmp/");
    }

    #[test]
    fn builtin_write_without_override_is_rejected() {
        let store = VariableStore::new();
        let err = store.set_numeric("OSVersion", 1, false).unwrap_err();
        assert!(matches!(err, EngineError::BuiltinReadonly { .. }));
        store.set_numeric("OSVersion", 1, true).unwrap();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        assert_eq!(store.get_numeric("OSVersion", &folders, &host).unwrap(), 1);
    }

    #[test]
    fn serialize_deserialize_round_trip_preserves_non_builtin_variables() {
        let store = VariableStore::new();
        store.set_string("Foo", "bar", false).unwrap();
        store.set_persisted("Foo", true);
        let blob = store.serialize(true).unwrap();

        let restored = VariableStore::new();
        restored.deserialize(&blob, true).unwrap();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        assert_eq!(restored.get_string("Foo", &folders, &host).unwrap(), "bar");
    }

    #[test]
    fn import_command_line_seeds_literal_variables() {
        let store = VariableStore::new();
        store.import_command_line("Foo=bar -install", &[("Foo".to_string(), "bar".to_string())]);
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        assert_eq!(store.get_string("Foo", &folders, &host).unwrap(), "bar");
        assert_eq!(
            store.get_string("BundleCommandLineArgs", &folders, &host).unwrap(),
            "Foo=bar -install"
        );
    }
}
