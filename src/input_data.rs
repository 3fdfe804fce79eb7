//! Code for opening input files and mapping them into memory. Mapped files are owned here for the
//! lifetime of the session, so slices handed out to archive members remain valid until the
//! `InputData` is dropped.

use crate::error::Result;
use crate::file_kind::FileKind;
use anyhow::Context as _;
use memmap2::Mmap;
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;

/// Configuration for opening inputs. Stands in for the command-line layer, which lives elsewhere.
#[derive(Debug, Default)]
pub struct Options {
    pub inputs: Vec<PathBuf>,

    /// Path of the LTO linker plugin, if one is configured. Affects classification of fat LTO
    /// objects.
    pub lto_plugin: Option<PathBuf>,

    /// Prepopulating maps generally slows things down, so is off by default, however it's useful
    /// when profiling, since the cost of first-touch page faults doesn't get misattributed to
    /// whatever code happens to read the mapping first.
    pub prepopulate_maps: bool,
}

#[derive(Debug)]
pub struct InputData<'config> {
    pub config: &'config Options,
    filenames: HashSet<PathBuf>,
    pub files: Vec<InputFile>,
}

#[derive(Debug)]
pub struct InputFile {
    pub filename: PathBuf,
    pub kind: FileKind,

    /// None for empty files, which can't be mapped.
    bytes: Option<Mmap>,
}

/// Identifies an input object that may be an entry in an archive rather than a regular file on
/// disk.
#[derive(Clone)]
pub struct InputRef<'data> {
    pub file: &'data InputFile,
    pub entry: Option<EntryMeta<'data>>,
}

#[derive(Clone)]
pub struct EntryMeta<'data> {
    /// The name under which the entry was stored in the archive.
    pub identifier: &'data [u8],

    /// Where the entry's bytes came from: a range of the archive for fat members, a range of the
    /// referenced file for thin members.
    pub from: Range<usize>,
}

impl InputFile {
    pub fn data(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or_default()
    }
}

impl<'config> InputData<'config> {
    #[tracing::instrument(skip_all, name = "Open input files")]
    pub fn from_options(config: &'config Options) -> Result<Self> {
        let mut input_data = Self {
            config,
            filenames: HashSet::new(),
            files: Vec::new(),
        };
        for path in &config.inputs {
            input_data.register_input(path)?;
        }
        Ok(input_data)
    }

    fn register_input(&mut self, path: &Path) -> Result {
        if !self.filenames.insert(path.to_owned()) {
            // File has already been added.
            return Ok(());
        }
        let size = std::fs::metadata(path)
            .with_context(|| {
                format!("Failed to read metadata of input file `{}`", path.display())
            })?
            .len();
        let bytes = (size > 0)
            .then(|| mmap_file(path, self.config.prepopulate_maps))
            .transpose()?;
        let kind = FileKind::identify_bytes(
            bytes.as_deref().unwrap_or_default(),
            self.config.lto_plugin.is_some(),
        );
        tracing::debug!(file = %path.display(), %kind, "Identified input file");
        self.files.push(InputFile {
            filename: path.to_owned(),
            kind,
            bytes,
        });
        Ok(())
    }
}

pub(crate) fn mmap_file(path: &Path, prepopulate_maps: bool) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open input file `{}`", path.display()))?;

    // Safety: This is only sound if nothing modifies or truncates the file while we have it
    // mapped. There's no way to protect against that on Linux, so like other linkers we accept
    // the risk in exchange for not reading parts of the inputs that we never look at.
    let mut mmap_options = memmap2::MmapOptions::new();
    if prepopulate_maps {
        mmap_options.populate();
    }
    let bytes = unsafe { mmap_options.map(&file) }
        .with_context(|| format!("Failed to mmap input file `{}`", path.display()))?;

    Ok(bytes)
}

impl std::fmt::Display for InputRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.file.filename.display(), f)?;
        if let Some(entry) = &self.entry {
            std::fmt::Display::fmt(" @ ", f)?;
            std::fmt::Display::fmt(&String::from_utf8_lossy(entry.identifier), f)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InputRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn open_and_classify() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.o");
        std::fs::File::create(&empty).unwrap();
        let script = dir.path().join("lib.so");
        std::fs::File::create(&script)
            .unwrap()
            .write_all(b"GROUP ( /lib/libc.so.6 )\n")
            .unwrap();

        let config = Options {
            inputs: vec![empty.clone(), script, empty],
            ..Default::default()
        };
        let input_data = InputData::from_options(&config).unwrap();

        // The duplicate path is only opened once.
        assert_eq!(input_data.files.len(), 2);
        assert_eq!(input_data.files[0].kind, FileKind::Empty);
        assert!(input_data.files[0].data().is_empty());
        assert_eq!(input_data.files[1].kind, FileKind::Text);
    }

    #[test]
    fn missing_input_is_an_error() {
        let config = Options {
            inputs: vec![PathBuf::from("/no/such/file.o")],
            ..Default::default()
        };
        let err = InputData::from_options(&config).unwrap_err();
        assert!(err.to_string().contains("/no/such/file.o"));
    }
}
