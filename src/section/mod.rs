//! Bundle section parser (C4, `spec.md` 4.4).
//!
//! Locates the `.wixburn`-named metadata section embedded in the
//! bundle's own PE-like image and derives the byte ranges of the
//! containers appended after it. This module owns only the *parsing*;
//! streaming payloads out of a located container is
//! [`crate::container`].

pub mod descriptor;
pub mod reader;

pub use descriptor::SectionDescriptor;
pub use reader::SectionReader;
