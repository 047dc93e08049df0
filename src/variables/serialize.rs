//! Variable store (de)serialization across the elevation boundary
//! (`spec.md` 4.3).
//!
//! `serialize(persisting)` writes the declared count then each
//! variable as `{included: u32, name, type: u32, value, literal: u32}`.
//! When `persisting` is `false`, every variable except `builtin` is
//! included; when `true`, only `persisted` variables are included.
//! Numeric and version values are written as `u64` on the wire (the
//! source's `BURN_VARIANT` always widens both to 64 bits for
//! transport, regardless of the in-memory signedness of `Numeric`).
//!
//! `deserialize(was_persisted)` is the inverse: the write policy is
//! [`super::variable::WritePolicy::OverridePersistedBuiltins`] when
//! `was_persisted` is `true`, else
//! [`super::variable::WritePolicy::AnyNonBuiltin`].

use crate::codec::{Reader, Writer};
use crate::error::{EngineError, Result};
use crate::variant::{Variant, VariantType};

use super::variable::InternalType;

const TYPE_NONE: u32 = 0;
const TYPE_NUMERIC: u32 = 1;
const TYPE_VERSION: u32 = 2;
const TYPE_STRING: u32 = 3;

/// One variable's wire-ready snapshot, decoupled from
/// [`super::variable::Variable`] so the (de)serializer does not need
/// mutable store access to build the list it writes.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedVariable {
    /// Display name.
    pub name: String,
    /// Plaintext value (hidden variables are decrypted before
    /// serialization and re-encrypted by the receiving store).
    pub value: Variant,
    /// Whether the variable is marked literal.
    pub literal: bool,
}

/// Whether a variable should be included in a given serialization
/// pass.
#[must_use]
pub fn include_in_serialization(internal_type: InternalType, persisted: bool, persisting: bool) -> bool {
    if persisting {
        persisted
    } else {
        internal_type != InternalType::Builtin
    }
}

/// Encodes `variables` (already filtered by [`include_in_serialization`])
/// into the wire format: declared count, then each entry.
#[must_use]
pub fn serialize(variables: &[SerializedVariable]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(u32::try_from(variables.len()).unwrap_or(u32::MAX));
    for var in variables {
        w.write_u32(1); // included
        w.write_string(&var.name);
        let (type_tag, encoded) = encode_value(&var.value);
        w.write_u32(type_tag);
        w.write_bytes(&encoded.into_bytes());
        w.write_u32(u32::from(var.literal));
    }
    w.into_bytes()
}

fn encode_value(value: &Variant) -> (u32, Writer) {
    let mut w = Writer::new();
    match value {
        Variant::None => (TYPE_NONE, w),
        Variant::Numeric(n) => {
            w.write_u64(*n as u64);
            (TYPE_NUMERIC, w)
        }
        Variant::Version(v) => {
            w.write_u64(*v);
            (TYPE_VERSION, w)
        }
        Variant::Str(s) => {
            w.write_string(s);
            (TYPE_STRING, w)
        }
    }
}

/// Decodes a blob produced by [`serialize`] back into a list of
/// [`SerializedVariable`]s.
///
/// # Errors
/// Returns [`EngineError::ShortRead`] on truncated input or
/// [`EngineError::CorruptFormat`] on an unrecognized type tag.
pub fn deserialize(bytes: &[u8]) -> Result<Vec<SerializedVariable>> {
    let mut r = Reader::new(bytes);
    let count = r.read_u32()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let included = r.read_u32()?;
        if included == 0 {
            continue;
        }
        let name = r.read_string()?;
        let type_tag = r.read_u32()?;
        let value = match type_tag {
            TYPE_NONE => Variant::None,
            TYPE_NUMERIC => Variant::Numeric(r.read_u64()? as i64),
            TYPE_VERSION => Variant::Version(r.read_u64()?),
            TYPE_STRING => Variant::Str(r.read_string()?),
            other => {
                return Err(EngineError::CorruptFormat {
                    what: format!("unknown serialized variant type tag {other}"),
                    path: None,
                })
            }
        };
        let literal = r.read_u32()? != 0;
        out.push(SerializedVariable { name, value, literal });
    }
    Ok(out)
}

#[must_use]
pub(super) fn variant_type_tag(ty: VariantType) -> u32 {
    match ty {
        VariantType::None => TYPE_NONE,
        VariantType::Numeric => TYPE_NUMERIC,
        VariantType::Version => TYPE_VERSION,
        VariantType::Str => TYPE_STRING,
    }
}
