//! Code to read ar files, both regular ("fat") and thin. We don't use the ar crate because it
//! provides access to data only via the Read trait and we want to borrow the data of each entry.
//! We do however use the ar crate as a dev dependency in our tests so that we can verify
//! consistency.
//!
//! Three filename encodings are in use. Short names are stored inline in the 16-byte name field
//! of the member header, terminated by `/`. GNU/SysV long names are stored in a string table
//! pseudo-member named `// `, with the header holding `/` followed by a decimal byte offset into
//! that table. BSD long names are stored as `#1/` followed by a decimal length, with the name
//! bytes placed at the start of the member body itself.

use crate::error::Result;
use anyhow::Context as _;
use anyhow::anyhow;
use anyhow::bail;
use bytemuck::Pod;
use bytemuck::Zeroable;

#[derive(Debug)]
pub(crate) enum ArchiveEntry<'data> {
    /// A member whose bytes are stored in the archive itself.
    Inline(InlineMember<'data>),
    /// A thin archive member. The archive stores only the filename; the bytes live in a separate
    /// file.
    Reference(ReferencedMember<'data>),
}

#[derive(Debug)]
pub(crate) struct InlineMember<'data> {
    pub(crate) name: &'data [u8],

    pub(crate) entry_data: &'data [u8],

    /// The offset in the archive at which `entry_data` starts.
    pub(crate) data_offset: usize,
}

#[derive(Debug)]
pub(crate) struct ReferencedMember<'data> {
    pub(crate) name: &'data [u8],
}

pub(crate) struct ArchiveIterator<'data> {
    /// Bytes not yet consumed.
    data: &'data [u8],

    /// Offset of `data` from the start of the archive file. Member headers are 2-byte aligned
    /// relative to this.
    offset: usize,

    is_thin: bool,

    /// Body of the `// ` pseudo-member, once seen. Long SysV-style names reference offsets into
    /// this.
    strtab: Option<&'data [u8]>,
}

#[derive(Zeroable, Pod, Clone, Copy)]
#[repr(C)]
struct EntryHeader {
    name: [u8; 16],
    _mtime: [u8; 12],
    _uid: [u8; 6],
    _gid: [u8; 6],
    _mode: [u8; 8],
    size: [u8; 10],
    _end: [u8; 2],
}

const HEADER_SIZE: usize = size_of::<EntryHeader>();

const _ASSERTS: () = {
    assert!(HEADER_SIZE == 60);
};

impl<'data> ArchiveIterator<'data> {
    /// Creates an iterator from the bytes of the whole archive, including the format magic.
    pub(crate) fn from_archive_bytes(data: &'data [u8]) -> Result<Self> {
        if let Some(rest) = data.strip_prefix(&object::archive::MAGIC) {
            Ok(Self {
                data: rest,
                offset: object::archive::MAGIC.len(),
                is_thin: false,
                strtab: None,
            })
        } else if let Some(rest) = data.strip_prefix(&object::archive::THIN_MAGIC) {
            Ok(Self {
                data: rest,
                offset: object::archive::THIN_MAGIC.len(),
                is_thin: true,
                strtab: None,
            })
        } else {
            bail!("Missing archive magic");
        }
    }

    /// Advances to the next real member, consuming string-table and symbol-table pseudo-members
    /// along the way.
    fn next_result(&mut self) -> Result<Option<ArchiveEntry<'data>>> {
        loop {
            // Each member header is aligned to a 2-byte boundary. A single newline is used as
            // filler.
            if self.offset % 2 == 1 && !self.data.is_empty() {
                self.data = &self.data[1..];
                self.offset += 1;
            }
            let end_of_archive = if self.is_thin {
                self.data.is_empty()
            } else {
                self.data.len() < 2
            };
            if end_of_archive {
                return Ok(None);
            }
            if self.data.len() < HEADER_SIZE {
                bail!("Short member header");
            }
            let (header_bytes, rest) = self.data.split_at(HEADER_SIZE);
            let header: &EntryHeader = bytemuck::from_bytes(header_bytes);
            self.data = rest;
            self.offset += HEADER_SIZE;
            let size = parse_decimal(&header.size);

            // The string table pseudo-member holds long filenames for subsequent members.
            if header.name.starts_with(b"// ") {
                self.strtab = Some(self.take(size).with_context(|| {
                    format!("String table of size {size} extends past end of archive")
                })?);
                continue;
            }

            // The archive's symbol table isn't useful to us. We use the symbol tables of the
            // individual objects instead.
            if header.name.starts_with(b"/ ") || header.name.starts_with(b"/SYM64/ ") {
                self.take(size).with_context(|| {
                    format!("Symbol table of size {size} extends past end of archive")
                })?;
                continue;
            }

            let entry = if self.is_thin {
                self.next_thin_member(header)?
            } else {
                self.next_fat_member(header, size)?
            };

            // Legacy symbol table members are identified by name rather than by a special header.
            let name = match &entry {
                ArchiveEntry::Inline(member) => member.name,
                ArchiveEntry::Reference(member) => member.name,
            };
            if name == b"__.SYMDEF" || name == b"__.SYMDEF SORTED" {
                continue;
            }
            return Ok(Some(entry));
        }
    }

    fn next_fat_member(
        &mut self,
        header: &'data EntryHeader,
        size: usize,
    ) -> Result<ArchiveEntry<'data>> {
        let mut body_size = size;
        let name = if let Some(len_field) = header.name.strip_prefix(b"#1/") {
            // The BSD-style name occupies the first bytes of the member body.
            let name_len = parse_decimal(len_field);
            if name_len > body_size {
                bail!("Long filename of size {name_len} extends past member of size {size}");
            }
            body_size -= name_len;
            let raw = self.take(name_len).with_context(|| {
                format!("Long filename of size {name_len} extends past end of archive")
            })?;
            trim_at_nul(raw)
        } else if header.name.starts_with(b"/") {
            self.strtab_name(&header.name[1..])?
        } else {
            inline_name(&header.name)
        };
        let data_offset = self.offset;
        let entry_data = self
            .take(body_size)
            .with_context(|| format!("Entry of size {size} extends past end of archive"))?;
        Ok(ArchiveEntry::Inline(InlineMember {
            name,
            entry_data,
            data_offset,
        }))
    }

    fn next_thin_member(&mut self, header: &'data EntryHeader) -> Result<ArchiveEntry<'data>> {
        // The size field of a thin member describes the referenced file, not the entry, so
        // nothing except a BSD-style name follows the header. Short inline names aren't valid in
        // thin archives.
        let name = if let Some(len_field) = header.name.strip_prefix(b"#1/") {
            let name_len = parse_decimal(len_field);
            let raw = self.take(name_len).with_context(|| {
                format!("Long filename of size {name_len} extends past end of archive")
            })?;
            trim_at_nul(raw)
        } else if header.name.starts_with(b"/") {
            self.strtab_name(&header.name[1..])?
        } else {
            bail!("filename is not stored as a long filename");
        };
        Ok(ArchiveEntry::Reference(ReferencedMember { name }))
    }

    fn take(&mut self, size: usize) -> Option<&'data [u8]> {
        if self.data.len() < size {
            return None;
        }
        let (taken, rest) = self.data.split_at(size);
        self.data = rest;
        self.offset += size;
        Some(taken)
    }

    /// Resolves a SysV-style `/offset` name against the string table, where each entry is
    /// terminated by `/\n`.
    fn strtab_name(&self, offset_field: &[u8]) -> Result<&'data [u8]> {
        let offset = parse_decimal(offset_field);
        let strtab = self
            .strtab
            .ok_or_else(|| anyhow!("Long filename referenced before string table"))?;
        let rest = strtab
            .get(offset..)
            .ok_or_else(|| anyhow!("Long filename offset {offset} is outside the string table"))?;
        let end = memchr::memmem::find(rest, b"/\n")
            .ok_or_else(|| anyhow!("Unterminated string table entry at offset {offset}"))?;
        Ok(&rest[..end])
    }
}

impl<'data> Iterator for ArchiveIterator<'data> {
    type Item = Result<ArchiveEntry<'data>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_result().transpose()
    }
}

impl<'data> InlineMember<'data> {
    pub(crate) fn data_range(&self) -> std::ops::Range<usize> {
        self.data_offset..self.data_offset + self.entry_data.len()
    }
}

/// Parses an ASCII decimal, skipping leading spaces and ignoring trailing padding. This is what
/// the ar format uses for sizes, BSD name lengths and string table offsets.
fn parse_decimal(field: &[u8]) -> usize {
    let mut value = 0_usize;
    for byte in field.iter().skip_while(|b| **b == b' ') {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value * 10 + usize::from(byte - b'0');
    }
    value
}

/// A BSD-style name is padded with NULs to the stored length.
fn trim_at_nul(name: &[u8]) -> &[u8] {
    &name[..memchr::memchr(0, name).unwrap_or(name.len())]
}

/// A short inline name is terminated by `/`, or fills the whole 16-byte field.
fn inline_name(field: &[u8; 16]) -> &[u8] {
    &field[..memchr::memchr(b'/', field).unwrap_or(field.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    /// Appends a member header. Field layout must match `EntryHeader`.
    fn push_header(out: &mut Vec<u8>, name: &str, size: usize) {
        assert!(name.len() <= 16);
        out.extend_from_slice(format!("{name:<16}").as_bytes());
        out.extend_from_slice(b"0           "); // mtime
        out.extend_from_slice(b"0     "); // uid
        out.extend_from_slice(b"0     "); // gid
        out.extend_from_slice(b"644     "); // mode
        out.extend_from_slice(format!("{size:<10}").as_bytes());
        out.extend_from_slice(b"`\n");
    }

    fn push_body(out: &mut Vec<u8>, body: &[u8]) {
        out.extend_from_slice(body);
        if out.len() % 2 == 1 {
            out.push(b'\n');
        }
    }

    fn members(archive: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        ArchiveIterator::from_archive_bytes(archive)
            .unwrap()
            .map(|entry| match entry.unwrap() {
                ArchiveEntry::Inline(member) => {
                    (member.name.to_owned(), member.entry_data.to_owned())
                }
                ArchiveEntry::Reference(member) => (member.name.to_owned(), Vec::new()),
            })
            .collect()
    }

    #[test]
    fn short_inline_names() {
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "foo.o/", 3);
        push_body(&mut archive, b"abc");
        push_header(&mut archive, "bar.o/", 4);
        push_body(&mut archive, b"defg");
        assert_eq!(
            members(&archive),
            vec![
                (b"foo.o".to_vec(), b"abc".to_vec()),
                (b"bar.o".to_vec(), b"defg".to_vec()),
            ]
        );
    }

    #[test]
    fn sysv_long_names_and_symbol_tables() {
        let long_name = "a_very_long_name_that_exceeds_16_bytes.o";
        let strtab = format!("{long_name}/\n");
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "/ ", 4);
        push_body(&mut archive, &[0, 0, 0, 0]);
        push_header(&mut archive, "// ", strtab.len());
        push_body(&mut archive, strtab.as_bytes());
        push_header(&mut archive, "foo.o/", 80);
        push_body(&mut archive, &[1; 80]);
        push_header(&mut archive, "/ ", 4);
        push_body(&mut archive, &[0, 0, 0, 0]);
        push_header(&mut archive, "/0", 120);
        push_body(&mut archive, &[2; 120]);

        assert_eq!(
            members(&archive),
            vec![
                (b"foo.o".to_vec(), vec![1; 80]),
                (long_name.as_bytes().to_vec(), vec![2; 120]),
            ]
        );
    }

    /// The same logical name decodes identically from all three encodings.
    #[test]
    fn name_encodings_are_equivalent() {
        let strtab = "foo.o/\n";
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "// ", strtab.len());
        push_body(&mut archive, strtab.as_bytes());
        push_header(&mut archive, "foo.o/", 2);
        push_body(&mut archive, b"aa");
        push_header(&mut archive, "/0", 2);
        push_body(&mut archive, b"bb");
        push_header(&mut archive, "#1/6", 8);
        push_body(&mut archive, b"foo.o\0cc");
        assert_eq!(
            members(&archive),
            vec![
                (b"foo.o".to_vec(), b"aa".to_vec()),
                (b"foo.o".to_vec(), b"bb".to_vec()),
                (b"foo.o".to_vec(), b"cc".to_vec()),
            ]
        );
    }

    #[test]
    fn member_headers_are_aligned() {
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "a/", 3);
        let before_pad = archive.len() + 3;
        push_body(&mut archive, b"xyz");
        assert_eq!(before_pad % 2, 1);
        assert_eq!(archive.len() % 2, 0);
        push_header(&mut archive, "b/", 2);
        push_body(&mut archive, b"hi");
        assert_eq!(
            members(&archive),
            vec![
                (b"a".to_vec(), b"xyz".to_vec()),
                (b"b".to_vec(), b"hi".to_vec()),
            ]
        );
    }

    #[test]
    fn bsd_long_names() {
        let name = b"another_name_longer_than_the_field.o";
        let mut body = name.to_vec();
        body.push(0);
        body.push(0);
        body.extend_from_slice(b"payload");
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, &format!("#1/{}", name.len() + 2), body.len());
        push_body(&mut archive, &body);
        assert_eq!(
            members(&archive),
            vec![(name.to_vec(), b"payload".to_vec())]
        );
    }

    #[test]
    fn symdef_members_are_skipped() {
        let mut archive = object::archive::MAGIC.to_vec();
        let mut body = b"__.SYMDEF SORTED".to_vec();
        body.extend_from_slice(&[0; 8]);
        push_header(&mut archive, "#1/16", body.len());
        push_body(&mut archive, &body);
        push_header(&mut archive, "foo.o/", 2);
        push_body(&mut archive, b"ok");
        assert_eq!(members(&archive), vec![(b"foo.o".to_vec(), b"ok".to_vec())]);
    }

    #[test]
    fn thin_archive_entries() {
        let strtab = "dir/first_object_with_a_long_name.o/\nsecond.o/\n";
        let mut archive = object::archive::THIN_MAGIC.to_vec();
        push_header(&mut archive, "// ", strtab.len());
        push_body(&mut archive, strtab.as_bytes());
        // Sizes describe the referenced files and must not be skipped.
        push_header(&mut archive, "/0", 4096);
        push_header(&mut archive, "/37", 123);
        // BSD-style names do store their bytes in the archive, even in thin archives.
        push_header(&mut archive, "#1/8", 17);
        archive.extend_from_slice(b"third.o\0");
        assert_eq!(
            members(&archive),
            vec![
                (b"dir/first_object_with_a_long_name.o".to_vec(), Vec::new()),
                (b"second.o".to_vec(), Vec::new()),
                (b"third.o".to_vec(), Vec::new()),
            ]
        );
    }

    #[test]
    fn thin_archive_rejects_short_names() {
        let mut archive = object::archive::THIN_MAGIC.to_vec();
        push_header(&mut archive, "foo.o/", 10);
        let err = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("not stored as a long filename"));
    }

    #[test]
    fn long_name_requires_string_table() {
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "/0", 2);
        push_body(&mut archive, b"hi");
        let err = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("before string table"));
    }

    #[test]
    fn truncated_member_is_an_error() {
        let mut archive = object::archive::MAGIC.to_vec();
        push_header(&mut archive, "foo.o/", 100);
        push_body(&mut archive, b"not a hundred bytes");
        let err = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("past end of archive"));
    }

    #[test]
    fn not_an_archive() {
        assert!(ArchiveIterator::from_archive_bytes(b"definitely not").is_err());
    }

    /// Verify against the ar crate on an archive it wrote itself, long names included.
    #[test]
    fn consistency_with_ar_crate() {
        let identifiers = vec![
            b"short.o".to_vec(),
            b"a_name_well_past_the_sixteen_byte_limit.o".to_vec(),
        ];
        let contents: Vec<&[u8]> = vec![b"first contents", b"second contents!"];

        let mut builder = ar::GnuBuilder::new(Vec::new(), identifiers.clone());
        for (identifier, data) in identifiers.iter().zip(&contents) {
            builder
                .append(&ar::Header::new(identifier.clone(), data.len() as u64), *data)
                .unwrap();
        }
        let archive = builder.into_inner().unwrap();

        let ours = members(&archive);

        let mut reader = ar::Archive::new(std::io::Cursor::new(&archive));
        let mut theirs = Vec::new();
        while let Some(entry) = reader.next_entry() {
            let mut entry = entry.unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            theirs.push((entry.header().identifier().to_owned(), bytes));
        }

        assert_eq!(ours, theirs);
    }
}
