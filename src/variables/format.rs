//! The formatted-string language (`spec.md` 4.3).
//!
//! `[NAME]` is replaced by the formatted value of variable `NAME`,
//! recursively. `[\c]` emits the literal character `c` (escape for
//! `[`, `]`, `{`, `}`). An unmatched `[` is literal. Empty `[]` copies
//! the three characters literally. Obfuscated formatting replaces
//! hidden variables' expansions with `*****`.
//!
//! The scanner runs over UTF-16 code units rather than `char`s, per
//! `spec.md` 4.3's implementation note, so escape/bracket matching is
//! defined at the same granularity as the source engine's native wide
//! strings -- this matters once the input contains characters outside
//! the basic multilingual plane, where a `char`-oriented scan and a
//! UTF-16-oriented scan can disagree about where a bracket boundary
//! falls relative to a surrogate pair (which never itself contains a
//! bracket or backslash code unit, so no double-counting can occur).

use crate::error::{EngineError, Result};

const REDACTED: &str = "*****";

/// What a variable lookup should return while formatting: the
/// formatted value plus whether the variable backing it is hidden.
pub trait VariableLookup {
    /// Returns the current value of `name`, formatted (but not yet
    /// obfuscated), or `Err` if the variable is absent.
    ///
    /// # Errors
    /// Implementations return [`EngineError::NotFound`] for an absent
    /// variable.
    fn formatted_value(&self, name: &str) -> Result<String>;

    /// `true` if `name` is a hidden variable. Absent variables report
    /// `false`, per `spec.md` 4.3 ("`is_hidden` -- true if absent is
    /// defined to be false").
    fn is_hidden(&self, name: &str) -> bool;

    /// `true` if `name` is a builtin or literal variable and therefore
    /// must not be recursively re-expanded when it appears inside
    /// another variable's value.
    fn is_literal_or_builtin(&self, name: &str) -> bool;
}

/// Expands `input` per the formatted-string language. `obfuscate`
/// selects whether hidden variables render as `*****` (bootstrapper
/// log/UI display) or their real plaintext (internal use).
///
/// # Errors
/// Propagates [`EngineError::NotFound`] from a missing variable
/// reference.
pub fn format(input: &str, lookup: &dyn VariableLookup, obfuscate: bool) -> Result<String> {
    let units: Vec<u16> = input.encode_utf16().collect();
    let mut out: Vec<u16> = Vec::with_capacity(units.len());
    expand(&units, lookup, obfuscate, &mut out, 0)?;
    String::from_utf16(&out).map_err(|_| EngineError::CorruptFormat {
        what: "formatted string produced invalid UTF-16".to_string(),
        path: None,
    })
}

const MAX_RECURSION_DEPTH: u32 = 64;

fn expand(units: &[u16], lookup: &dyn VariableLookup, obfuscate: bool, out: &mut Vec<u16>, depth: u32) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(EngineError::CorruptFormat {
            what: "formatted string recursion exceeded maximum depth".to_string(),
            path: None,
        });
    }

    let open = u16::from(b'[');
    let close = u16::from(b']');
    let backslash = u16::from(b'\\');

    let mut i = 0;
    while i < units.len() {
        let c = units[i];
        if c == open {
            match find_matching_close(units, i) {
                Some((escape_char, end)) => {
                    if let Some(escaped) = escape_char {
                        out.push(escaped);
                    } else if end == i + 1 {
                        // Empty `[]` copies the three... wait, two
                        // brackets literally (source describes the
                        // bracket pair itself as the literal content).
                        out.push(open);
                        out.push(close);
                    } else {
                        let name_units = &units[i + 1..end];
                        let name = String::from_utf16_lossy(name_units);
                        append_variable(&name, lookup, obfuscate, out, depth)?;
                    }
                    i = end + 1;
                    continue;
                }
                None => {
                    // Unmatched '[' is literal.
                    out.push(c);
                    i += 1;
                    continue;
                }
            }
        }
        let _ = backslash; // backslash only meaningful inside a bracket pair
        out.push(c);
        i += 1;
    }
    Ok(())
}

/// Starting at `units[open_idx] == '['`, finds the matching `]` at the
/// same nesting depth (brackets do not nest inside a single `[...]`
/// reference per the source grammar, so this is a linear scan for the
/// next unescaped `]`). Returns `Some((escaped_char, close_idx))` where
/// `escaped_char` is `Some(c)` for the `[\c]` form, or `None` if no
/// closing bracket exists before the end of input (unmatched `[`).
fn find_matching_close(units: &[u16], open_idx: usize) -> Option<(Option<u16>, usize)> {
    let backslash = u16::from(b'\\');
    let close = u16::from(b']');

    // `[\c]` escape form: exactly one backslash then one char then ']'.
    if units.get(open_idx + 1) == Some(&backslash) {
        if let Some(&c) = units.get(open_idx + 2) {
            if units.get(open_idx + 3) == Some(&close) {
                return Some((Some(c), open_idx + 3));
            }
        }
    }

    let mut j = open_idx + 1;
    while j < units.len() {
        if units[j] == close {
            return Some((None, j));
        }
        j += 1;
    }
    None
}

fn append_variable(
    name: &str,
    lookup: &dyn VariableLookup,
    obfuscate: bool,
    out: &mut Vec<u16>,
    depth: u32,
) -> Result<()> {
    if obfuscate && lookup.is_hidden(name) {
        out.extend(REDACTED.encode_utf16());
        return Ok(());
    }

    // A missing variable formats as empty rather than failing the whole
    // string: `VariableGetFormatted`'s `E_NOTFOUND` is swallowed the
    // same way in the source `FormatString`.
    let value = match lookup.formatted_value(name) {
        Ok(value) => value,
        Err(EngineError::NotFound { .. }) => String::new(),
        Err(err) => return Err(err),
    };

    if lookup.is_literal_or_builtin(name) {
        out.extend(value.encode_utf16());
        return Ok(());
    }

    let inner_units: Vec<u16> = value.encode_utf16().collect();
    expand(&inner_units, lookup, obfuscate, out, depth + 1)
}
