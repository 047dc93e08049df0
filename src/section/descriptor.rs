//! [`SectionDescriptor`]: the parsed body of the bundle's embedded
//! metadata section (`spec.md` 3, 6).

/// The fixed ASCII section name the reader looks for in the section
/// table, 8 bytes, zero-padded.
pub const SECTION_NAME: &[u8; 8] = b".wixburn";

/// The magic constant at the start of the section body.
pub const MAGIC: u32 = 0x00f1_4300;

/// The only section format version this reader understands.
pub const VERSION: u32 = 2;

/// The 16-byte bundle identity recorded in the section, compared
/// byte-for-byte between the on-disk section and the same section
/// re-read from the running image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleGuid(pub [u8; 16]);

/// Parsed body of the bundle's embedded metadata section, per
/// `spec.md` 3 and the binary layout in `spec.md` 6.
///
/// Invariant: container 0 begins at `stub_size`; container k>=1 begins
/// at `engine_size + sum(container_sizes[1..k-1])`. The in-file
/// section's `bundle_guid` MUST equal the same section read from the
/// running image in memory; a mismatch is fatal
/// ([`crate::error::EngineError::Tampered`]).
#[derive(Clone, Debug, PartialEq)]
pub struct SectionDescriptor {
    /// Byte offset where the bootstrapper stub (and container 0) ends
    /// -- actually, where container 0 *begins*; the stub occupies
    /// `[0, stub_size)`.
    pub stub_size: u64,
    /// Byte offset where the signed engine image ends and container
    /// k>=1 bookkeeping starts from, per the derivation order in
    /// `spec.md` 4.4.
    pub engine_size: u64,
    /// Total length of the bundle file, from the filesystem.
    pub bundle_size: u64,
    /// Offset of the checksum field in the optional header, used to
    /// recompute the authenticode-signed prefix.
    pub checksum_offset: u32,
    /// The checksum value recorded at build time.
    pub original_checksum: u32,
    /// Offset of the authenticode certificate table directory, if the
    /// bundle is signed.
    pub original_signature_offset: u32,
    /// Size of the authenticode certificate table directory.
    pub original_signature_size: u32,
    /// Opaque format tag carried through from the build tool.
    pub format_tag: u32,
    /// Declared size in bytes of each attached container, in
    /// declaration order. `container_sizes[0]` is container 0.
    pub container_sizes: Vec<u32>,
    /// The bundle's own identity, checked for tampering.
    pub bundle_guid: BundleGuid,
}

impl SectionDescriptor {
    /// Returns `(offset, size, present)` for the attached container at
    /// `index`, per `spec.md` 4.4/8 property 4:
    /// - index 0 is always at `stub_size`.
    /// - index k>=1 stacks starting at `engine_size`.
    /// - `present` is `true` iff `offset + size <= bundle_size`.
    #[must_use]
    pub fn attached_container_info(&self, index: usize) -> Option<(u64, u64, bool)> {
        let size = *self.container_sizes.get(index)? as u64;
        let offset = if index == 0 {
            self.stub_size
        } else {
            let preceding: u64 = self.container_sizes[1..index].iter().map(|s| u64::from(*s)).sum();
            self.engine_size + preceding
        };
        let present = offset.checked_add(size).is_some_and(|end| end <= self.bundle_size);
        Some((offset, size, present))
    }
}
