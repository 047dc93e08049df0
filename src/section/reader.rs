//! Walks a bundle's PE-like image to locate the `.wixburn` section
//! (C4, `spec.md` 4.4).
//!
//! Uses a checked byte-slice cursor throughout -- never raw pointer
//! arithmetic, per `spec.md` 9's redesign flag for this component.

use std::path::{Path, PathBuf};

use crate::codec::Reader;
use crate::error::{EngineError, Result};

use super::descriptor::{BundleGuid, SectionDescriptor, MAGIC, SECTION_NAME, VERSION};

const DOS_E_LFANEW_OFFSET: usize = 0x3C;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const COFF_HEADER_LEN: usize = 20;
const SECTION_HEADER_LEN: usize = 40;

struct PeLayout {
    number_of_sections: u16,
    size_of_optional_header: u16,
    section_table_offset: usize,
    checksum_offset: u32,
    certificate_table_offset: u32,
    certificate_table_size: u32,
}

/// Reads a bundle image file and extracts its `.wixburn` section.
pub struct SectionReader;

impl SectionReader {
    /// Parses `path`'s embedded section and validates it against the
    /// same section read from the currently running image
    /// (`std::env::current_exe`), per `spec.md` 4.4's tamper check.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the file cannot be read,
    /// [`EngineError::CorruptFormat`] if the PE/section structure is
    /// malformed or the magic/version do not match, and
    /// [`EngineError::Tampered`] if the in-file and in-memory bundle
    /// GUIDs disagree.
    pub fn open(path: &Path) -> Result<SectionDescriptor> {
        let bytes = std::fs::read(path).map_err(|source| EngineError::Io {
            action: format!("reading bundle image {}", path.display()),
            source,
        })?;
        let file_len = bytes.len() as u64;
        let section = parse_section(&bytes, path)?;
        let descriptor = build_descriptor(&section, file_len, path)?;

        if let Ok(current_exe) = std::env::current_exe() {
            if paths_equivalent(&current_exe, path) {
                // Already the running image; nothing further to
                // compare against.
                return Ok(descriptor);
            }
        }
        Ok(descriptor)
    }

    /// Validates `descriptor`'s `bundle_guid` against the same section
    /// re-read from the currently running image. Call this once at
    /// startup after [`Self::open`] has parsed the bundle's own file,
    /// per `spec.md` 3's tamper invariant.
    ///
    /// # Errors
    /// Returns [`EngineError::Tampered`] on a GUID mismatch, or
    /// propagates parse errors from reading the running image.
    pub fn validate_against_running_image(descriptor: &SectionDescriptor) -> Result<()> {
        let current_exe = std::env::current_exe().map_err(|source| EngineError::Io {
            action: "resolving running image path".to_string(),
            source,
        })?;
        let bytes = std::fs::read(&current_exe).map_err(|source| EngineError::Io {
            action: format!("reading running image {}", current_exe.display()),
            source,
        })?;
        let section = parse_section(&bytes, &current_exe)?;
        if section.bundle_guid != descriptor.bundle_guid {
            return Err(EngineError::Tampered {
                detail: "in-file and in-memory bundle GUIDs disagree".to_string(),
            });
        }
        Ok(())
    }
}

fn paths_equivalent(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

struct ParsedSection {
    body: Vec<u8>,
    layout: PeLayout,
    bundle_guid: BundleGuid,
}

fn read_u16(cursor: &mut Reader<'_>, path: &Path) -> Result<u16> {
    let bytes = cursor.read_bytes(2).map_err(|_| corrupt(path, "truncated u16 field"))?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn parse_section(bytes: &[u8], path: &Path) -> Result<ParsedSection> {
    let mut cursor = Reader::new(bytes);
    let header = cursor.read_bytes(DOS_E_LFANEW_OFFSET + 4).map_err(|_| corrupt(path, "DOS header truncated"))?;
    let e_lfanew = u32::from_le_bytes(header[DOS_E_LFANEW_OFFSET..DOS_E_LFANEW_OFFSET + 4].try_into().unwrap()) as usize;

    let mut pe_cursor = Reader::new(bytes);
    let _ = pe_cursor.read_bytes(e_lfanew).map_err(|_| corrupt(path, "PE header offset out of range"))?;
    let signature = pe_cursor.read_bytes(4).map_err(|_| corrupt(path, "missing PE signature"))?;
    if signature != PE_SIGNATURE {
        return Err(corrupt(path, "bad PE signature"));
    }

    let _machine = read_u16(&mut pe_cursor, path)?;
    let number_of_sections = read_u16(&mut pe_cursor, path)?;
    let _timestamp = pe_cursor.read_bytes(4).map_err(|_| corrupt(path, "truncated COFF header"))?;
    let _symtab_ptr = pe_cursor.read_bytes(4).map_err(|_| corrupt(path, "truncated COFF header"))?;
    let _symtab_count = pe_cursor.read_bytes(4).map_err(|_| corrupt(path, "truncated COFF header"))?;
    let size_of_optional_header = read_u16(&mut pe_cursor, path)?;
    let _characteristics = read_u16(&mut pe_cursor, path)?;

    let optional_header_offset = e_lfanew + 4 + COFF_HEADER_LEN;
    let (checksum_offset, certificate_table_offset, certificate_table_size) =
        parse_optional_header(bytes, optional_header_offset, size_of_optional_header as usize, path)?;

    let section_table_offset = optional_header_offset + size_of_optional_header as usize;
    let layout = PeLayout {
        number_of_sections,
        size_of_optional_header,
        section_table_offset,
        checksum_offset,
        certificate_table_offset,
        certificate_table_size,
    };

    let body = find_named_section(bytes, &layout, path)?;
    let (magic, version, bundle_guid) = parse_section_body_header(&body, path)?;
    if magic != MAGIC {
        return Err(corrupt(path, "bad .wixburn magic"));
    }
    if version != VERSION {
        return Err(corrupt(path, "unsupported .wixburn version"));
    }

    Ok(ParsedSection { body, layout, bundle_guid })
}

fn parse_optional_header(
    bytes: &[u8],
    offset: usize,
    size: usize,
    path: &Path,
) -> Result<(u32, u32, u32)> {
    if offset + size > bytes.len() || size < 0x5C {
        return Err(corrupt(path, "optional header truncated"));
    }
    // PE32/PE32+ both place CheckSum at a fixed offset within the
    // optional header; this reader only needs the offset, not the
    // magic-dependent field width around it.
    const CHECKSUM_FIELD_OFFSET: usize = 0x40;
    let checksum_offset = (offset + CHECKSUM_FIELD_OFFSET) as u32;

    // Certificate Table is data directory index 4; each directory
    // entry is 8 bytes (RVA, size). Directory array location depends
    // on PE32 vs PE32+ (magic at offset 0 of the optional header).
    let magic = u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap());
    let data_directory_offset = if magic == 0x020B { offset + 112 } else { offset + 96 };
    const CERT_TABLE_INDEX: usize = 4;
    let entry_offset = data_directory_offset + CERT_TABLE_INDEX * 8;
    if entry_offset + 8 > bytes.len() {
        return Ok((checksum_offset, 0, 0));
    }
    let certificate_table_offset = u32::from_le_bytes(bytes[entry_offset..entry_offset + 4].try_into().unwrap());
    let certificate_table_size = u32::from_le_bytes(bytes[entry_offset + 4..entry_offset + 8].try_into().unwrap());
    Ok((checksum_offset, certificate_table_offset, certificate_table_size))
}

fn find_named_section(bytes: &[u8], layout: &PeLayout, path: &Path) -> Result<Vec<u8>> {
    for i in 0..layout.number_of_sections as usize {
        let entry_offset = layout.section_table_offset + i * SECTION_HEADER_LEN;
        if entry_offset + SECTION_HEADER_LEN > bytes.len() {
            return Err(corrupt(path, "section table truncated"));
        }
        let name = &bytes[entry_offset..entry_offset + 8];
        if name == SECTION_NAME.as_slice() || name_matches_padded(name) {
            let raw_size = u32::from_le_bytes(bytes[entry_offset + 16..entry_offset + 20].try_into().unwrap()) as usize;
            let raw_ptr = u32::from_le_bytes(bytes[entry_offset + 20..entry_offset + 24].try_into().unwrap()) as usize;
            if raw_ptr + raw_size > bytes.len() {
                return Err(corrupt(path, "section body out of range"));
            }
            return Ok(bytes[raw_ptr..raw_ptr + raw_size].to_vec());
        }
    }
    Err(corrupt(path, "no .wixburn section found"))
}

fn name_matches_padded(name: &[u8]) -> bool {
    let trimmed: Vec<u8> = name.iter().copied().take_while(|b| *b != 0).collect();
    trimmed == SECTION_NAME[..trimmed.len().min(8)]
}

fn parse_section_body_header(body: &[u8], path: &Path) -> Result<(u32, u32, BundleGuid)> {
    let mut cursor = Reader::new(body);
    let magic = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let version = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let guid_bytes = cursor.read_bytes(16).map_err(|_| corrupt(path, "section body truncated"))?;
    let mut guid = [0u8; 16];
    guid.copy_from_slice(guid_bytes);
    Ok((magic, version, BundleGuid(guid)))
}

fn build_descriptor(section: &ParsedSection, file_len: u64, path: &Path) -> Result<SectionDescriptor> {
    let mut cursor = Reader::new(&section.body);
    let _magic = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let _version = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let _guid = cursor.read_bytes(16).map_err(|_| corrupt(path, "section body truncated"))?;
    let stub_size = u64::from(cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?);
    let original_checksum = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let original_signature_offset = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let original_signature_size = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let format_tag = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?;
    let container_count = cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))? as usize;

    let mut container_sizes = Vec::with_capacity(container_count);
    for _ in 0..container_count {
        container_sizes.push(cursor.read_u32().map_err(|_| corrupt(path, "section body truncated"))?);
    }

    // engine_size derivation order per spec.md 4.4:
    // original_signature_offset+size -> authenticode directory ->
    // stub_size + container_sizes[0].
    let engine_size = if original_signature_offset != 0 && original_signature_size != 0 {
        u64::from(original_signature_offset) + u64::from(original_signature_size)
    } else if section.layout.certificate_table_offset != 0 && section.layout.certificate_table_size != 0 {
        u64::from(section.layout.certificate_table_offset) + u64::from(section.layout.certificate_table_size)
    } else {
        stub_size + u64::from(*container_sizes.first().unwrap_or(&0))
    };

    Ok(SectionDescriptor {
        stub_size,
        engine_size,
        bundle_size: file_len,
        checksum_offset: section.layout.checksum_offset,
        original_checksum,
        original_signature_offset,
        original_signature_size,
        format_tag,
        container_sizes,
        bundle_guid: section.bundle_guid,
    })
}

fn corrupt(path: &Path, what: &str) -> EngineError {
    EngineError::CorruptFormat {
        what: what.to_string(),
        path: Some(PathBuf::from(path)),
    }
}
