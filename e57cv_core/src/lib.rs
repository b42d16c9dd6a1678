pub mod buffer;
pub mod cache;
pub mod checked_file;
pub mod codec;
pub mod codecs;
pub mod cvnode;
pub mod error;
pub mod imagefile;
pub mod inspect;
pub mod packet;
pub mod prototype;
pub mod reader;
pub mod writer;

pub use buffer::{new_region, MemoryBuffer, MemoryRepr, SourceDestBuffer, StringBuffer};
pub use cvnode::CompressedVectorNode;
pub use error::{Error, Result};
pub use imagefile::ImageFile;
pub use prototype::{FloatPrecision, NodeKind, Prototype};
pub use reader::Reader;
pub use writer::Writer;
