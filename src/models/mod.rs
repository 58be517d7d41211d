//! Data model: rows of the metadata store and the chunk/object engines

pub mod app;
pub mod chunk;
pub mod file;
pub mod history;
pub mod object;
pub mod object_chunk;
pub mod object_reader;
pub mod path_cache;
pub mod request;
pub mod token;

pub use app::App;
pub use chunk::{Chunk, CHUNK_SIZE};
pub use file::File;
pub use history::History;
pub use object::Object;
pub use object_chunk::ObjectChunk;
pub use object_reader::ObjectReader;
pub use request::RequestRecord;
pub use token::Token;
