//! Code for identifying what sort of file we're dealing with based on the bytes of the file.
//! Identification is best-effort: malformed or truncated input is never an error here, it just
//! means we classify the file as `Unknown` (or as a plain object when LTO sniffing fails).

use crate::elf::FileHeader32;
use crate::elf::FileHeader64;
use object::read::elf::FileHeader;
use object::read::elf::Sym as _;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileKind {
    Empty,
    ElfObj,
    ElfDso,
    Archive,
    ThinArchive,
    Text,
    GccLtoObj,
    LlvmBitcode,
    Unknown,
}

impl FileKind {
    /// Infers the kind of file from its contents. `lto_plugin_active` indicates whether an LTO
    /// linker plugin is configured, which makes fat LTO objects interesting. Malformed ELF
    /// metadata classifies as `Unknown` rather than failing.
    pub fn identify_bytes(data: &[u8], lto_plugin_active: bool) -> FileKind {
        if data.is_empty() {
            return FileKind::Empty;
        }
        if data.starts_with(&object::elf::ELFMAG) {
            return identify_elf(data, lto_plugin_active);
        }
        if data.starts_with(&object::archive::MAGIC) {
            return FileKind::Archive;
        }
        if data.starts_with(&object::archive::THIN_MAGIC) {
            return FileKind::ThinArchive;
        }
        if is_text(data) {
            return FileKind::Text;
        }
        // Either the bitcode wrapper format or raw bitcode.
        if data.starts_with(b"\xde\xc0\x17\x0b") || data.starts_with(b"BC\xc0\xde") {
            return FileKind::LlvmBitcode;
        }
        FileKind::Unknown
    }
}

/// Linker scripts don't have a signature, so we accept any file whose first four bytes are
/// printable ASCII or whitespace.
fn is_text(data: &[u8]) -> bool {
    fn is_text_byte(byte: u8) -> bool {
        (0x20..0x7f).contains(&byte) || byte == b'\n' || byte == b'\t'
    }

    data.len() >= 4 && data[..4].iter().all(|b| is_text_byte(*b))
}

/// Index of the class byte within `e_ident`. The `object` crate doesn't export this constant.
const EI_CLASS: usize = 4;

fn identify_elf(data: &[u8], lto_plugin_active: bool) -> FileKind {
    // Dispatch on the class byte of e_ident. Everything else about the header is validated by
    // `FileHeader::parse`.
    match data.get(EI_CLASS) {
        Some(&object::elf::ELFCLASS32) => {
            identify_elf_with::<FileHeader32>(data, lto_plugin_active)
        }
        Some(&object::elf::ELFCLASS64) => {
            identify_elf_with::<FileHeader64>(data, lto_plugin_active)
        }
        _ => FileKind::Unknown,
    }
}

fn identify_elf_with<F: FileHeader>(data: &[u8], lto_plugin_active: bool) -> FileKind {
    let Ok(header) = F::parse(data) else {
        return FileKind::Unknown;
    };
    let Ok(endian) = header.endian() else {
        return FileKind::Unknown;
    };
    match header.e_type(endian) {
        object::elf::ET_REL => {
            if is_gcc_lto_obj(header, endian, data, lto_plugin_active) {
                FileKind::GccLtoObj
            } else {
                FileKind::ElfObj
            }
        }
        object::elf::ET_DYN => FileKind::ElfDso,
        _ => FileKind::Unknown,
    }
}

/// Returns whether a relocatable object is really a GCC LTO object. See
/// https://gcc.gnu.org/onlinedocs/gccint/LTO.html
fn is_gcc_lto_obj<'data, F: FileHeader>(
    header: &'data F,
    endian: F::Endian,
    data: &'data [u8],
    lto_plugin_active: bool,
) -> bool {
    let Ok(sections) = header.sections(endian, data) else {
        return false;
    };

    // A fat LTO object contains both regular ELF sections and LTO sections, so that it can be
    // linked as an LTO object if a plugin is available and as a regular object otherwise. It's
    // identified by the presence of a `.gnu.lto_.symtab.*` section. Note that
    // `SectionTable::section_name` already handles the case where the section name string table
    // index overflows `e_shstrndx` and is escaped into the first section header's `sh_link`.
    if lto_plugin_active {
        for section in sections.iter() {
            if let Ok(name) = sections.section_name(endian, section) {
                if name.starts_with(b".gnu.lto_.symtab.") {
                    return true;
                }
            }
        }
    }

    // A slim LTO object contains only section symbols followed by a common symbol whose name is
    // `__gnu_lto_slim` (`__gnu_lto_v1` for older GCC releases). Only the first symbol table is
    // considered.
    let Ok(symbols) = sections.symbols(endian, data, object::elf::SHT_SYMTAB) else {
        return false;
    };
    let mut non_leading = symbols.iter().skip(1).skip_while(|sym| {
        matches!(
            sym.st_type(),
            object::elf::STT_NOTYPE | object::elf::STT_FILE | object::elf::STT_SECTION
        )
    });
    if let Some(sym) = non_leading.next() {
        if sym.st_shndx(endian) == object::elf::SHN_COMMON {
            if let Ok(name) = sym.name(endian, symbols.strings()) {
                return name.starts_with(b"__gnu_lto_");
            }
        }
    }
    false
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::Empty => "empty",
            FileKind::ElfObj => "ELF object",
            FileKind::ElfDso => "ELF shared object",
            FileKind::Archive => "archive",
            FileKind::ThinArchive => "thin archive",
            FileKind::Text => "text",
            FileKind::GccLtoObj => "GCC LTO object",
            FileKind::LlvmBitcode => "LLVM bitcode",
            FileKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
