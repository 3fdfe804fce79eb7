//! The input front end of a linker: given paths on disk, this crate maps them into memory,
//! identifies what each file is, expands archives into their members and provides the glob
//! matching used for symbol filtering. Symbol resolution, layout and output writing are the job
//! of later stages and live elsewhere.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub(crate) mod archive;
pub mod archive_splitter;
pub(crate) mod elf;
pub mod error;
pub mod export_list;
pub mod file_kind;
pub mod glob;
pub mod input_data;

pub use archive_splitter::InputBytes;
pub use archive_splitter::MemberData;
pub use archive_splitter::split_archives;
pub use error::Result;
pub use export_list::ExportList;
pub use file_kind::FileKind;
pub use glob::Glob;
pub use input_data::InputData;
pub use input_data::InputFile;
pub use input_data::InputRef;
pub use input_data::Options;

/// Initialises a tracing subscriber that logs to stderr, filtered by the usual environment
/// variable. Intended to be called once by whatever binary drives the link.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
