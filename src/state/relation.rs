//! Related-bundle records (`spec.md` GLOSSARY: Relation).
//!
//! A relation is the semantic connection between this bundle and
//! another one already registered on the machine. Ordering between
//! related bundles and ordinary packages is computed by
//! [`crate::plan::builder`] from `relation_type` and the command
//! action, per `spec.md` 4.6.

/// The semantic connection a related bundle has to this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationType {
    /// A bundle this one supersedes/upgrades; late-ordered to
    /// implement downgrade refcounts correctly.
    Upgrade,
    /// A bundle that adds optional content to another bundle.
    Addon,
    /// A bundle that patches another bundle in place.
    Patch,
    /// A bundle discovered purely for detection purposes (no
    /// ordering obligations).
    Detect,
    /// A bundle that depends on this one being present.
    Dependent,
    /// A bundle this one updates (service-pack style).
    Update,
}

/// A bundle related to this one, in declaration order.
#[derive(Clone, Debug)]
pub struct Relation {
    /// Stable provider key of the related bundle.
    pub provider_key: String,
    /// How the related bundle relates to this one.
    pub relation_type: RelationType,
    /// Path to the related bundle's own executable, used to relaunch
    /// it during ordering.
    pub bundle_path: std::path::PathBuf,
}
