//! Typed views over the bits of ELF that we need in order to classify input files. We use runtime
//! endianness because, unlike the later stages of a linker, classification needs to at least look
//! at files of any class and byte order before deciding what to do with them.

use object::Endianness;

pub(crate) type FileHeader32 = object::elf::FileHeader32<Endianness>;
pub(crate) type FileHeader64 = object::elf::FileHeader64<Endianness>;
