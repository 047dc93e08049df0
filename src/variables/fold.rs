//! Case-insensitive invariant collation for variable names (`spec.md`
//! 9: "define an explicit Unicode-aware casefold step; store the
//! original display name plus a folded key").
//!
//! Variable names are compared under an invariant, case-insensitive
//! collation; storage order in [`super::VariableStore`] is sorted by
//! that collation. Rust's `str::to_uppercase` is Unicode-aware and
//! locale-independent, matching the source engine's invariant-culture
//! intent without pulling in ICU.

/// The folded (case-insensitive) form of a variable name, used as the
/// store's sort/lookup key. Display uses the variable's original
/// `name`, never the folded key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FoldedKey(String);

impl FoldedKey {
    /// Folds `name` into its invariant comparison key.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.to_uppercase())
    }
}

impl std::borrow::Borrow<str> for FoldedKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_is_case_insensitive() {
        assert_eq!(FoldedKey::new("BundleVersion"), FoldedKey::new("bundleversion"));
        assert_eq!(FoldedKey::new("Foo"), FoldedKey::new("FOO"));
    }

    #[test]
    fn folding_distinguishes_different_names() {
        assert_ne!(FoldedKey::new("Foo"), FoldedKey::new("Bar"));
    }

    #[test]
    fn ordering_follows_folded_key() {
        let mut keys = vec![FoldedKey::new("zeta"), FoldedKey::new("Alpha"), FoldedKey::new("mu")];
        keys.sort();
        assert_eq!(keys, vec![FoldedKey::new("ALPHA"), FoldedKey::new("MU"), FoldedKey::new("ZETA")]);
    }
}
