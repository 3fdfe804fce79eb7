//! Expands archives into the list of member files the linker needs to consider. Fat archive
//! members borrow their bytes from the archive's own mapping. Thin archive members are separate
//! files that get opened and mapped here.

use crate::archive::ArchiveEntry;
use crate::archive::ArchiveIterator;
use crate::error::Result;
use crate::file_kind::FileKind;
use crate::input_data::EntryMeta;
use crate::input_data::InputData;
use crate::input_data::InputFile;
use crate::input_data::InputRef;
use crate::input_data::mmap_file;
use anyhow::Context as _;
use memmap2::Mmap;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::ffi::OsStr;
use std::fmt::Display;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug)]
pub enum MemberData<'data> {
    // Data originating from the archive itself, e.g. typical archive contents.
    Inline(&'data [u8]),
    // Data originating from a freshly opened file, e.g. files referenced by a thin archive.
    Loaded(Mmap),
}

#[derive(Debug)]
pub struct InputBytes<'data> {
    pub input: InputRef<'data>,
    pub kind: FileKind,
    pub data: MemberData<'data>,
}

impl MemberData<'_> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            MemberData::Inline(bytes) => bytes,
            MemberData::Loaded(mmap) => mmap,
        }
    }
}

/// Splits each archive into its members, passing other files through unchanged. Each file is
/// processed independently, so this parallelises over inputs without any shared state.
#[tracing::instrument(skip_all, name = "Split archives")]
pub fn split_archives<'data>(input_data: &'data InputData) -> Result<Vec<InputBytes<'data>>> {
    let lto_plugin_active = input_data.config.lto_plugin.is_some();
    let split_output = input_data
        .files
        .par_iter()
        .map(|file| match file.kind {
            FileKind::Archive | FileKind::ThinArchive => read_members(file, lto_plugin_active)
                .with_context(|| format!("Failed to read archive `{}`", file.filename.display())),
            _ => Ok(vec![InputBytes {
                input: InputRef { file, entry: None },
                kind: file.kind,
                data: MemberData::Inline(file.data()),
            }]),
        })
        .collect::<Result<Vec<Vec<InputBytes>>>>()?;
    Ok(split_output.into_iter().flatten().collect())
}

/// Reads the members of a single archive, in archive order. Archive members are never themselves
/// archives, so each one is classified as a leaf file.
pub fn read_members<'data>(
    file: &'data InputFile,
    lto_plugin_active: bool,
) -> Result<Vec<InputBytes<'data>>> {
    let mut outputs = Vec::new();
    for entry in ArchiveIterator::from_archive_bytes(file.data())? {
        match entry? {
            ArchiveEntry::Inline(member) => {
                outputs.push(InputBytes {
                    input: InputRef {
                        file,
                        entry: Some(EntryMeta {
                            identifier: member.name,
                            from: member.data_range(),
                        }),
                    },
                    kind: FileKind::identify_bytes(member.entry_data, lto_plugin_active),
                    data: MemberData::Inline(member.entry_data),
                });
            }
            ArchiveEntry::Reference(member) => {
                let path = resolve_member_path(&file.filename, member.name);
                let bytes = mmap_file(&path, false).with_context(|| {
                    format!(
                        "Failed to open member `{}` of thin archive",
                        path.display()
                    )
                })?;
                outputs.push(InputBytes {
                    input: InputRef {
                        file,
                        entry: Some(EntryMeta {
                            identifier: member.name,
                            from: 0..bytes.len(),
                        }),
                    },
                    kind: FileKind::identify_bytes(&bytes, lto_plugin_active),
                    data: MemberData::Loaded(bytes),
                });
            }
        }
    }
    Ok(outputs)
}

/// Thin archive members with relative names are resolved against the directory containing the
/// archive itself.
fn resolve_member_path(archive_path: &Path, name: &[u8]) -> PathBuf {
    let name = Path::new(OsStr::from_bytes(name));
    if name.is_absolute() {
        return name.to_owned();
    }
    archive_path.parent().unwrap_or(Path::new("")).join(name)
}

impl Display for InputBytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.input, f)
    }
}
