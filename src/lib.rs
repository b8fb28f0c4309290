//! Schema-driven codec for ISO base media file format (MP4) boxes.
//!
//! Box layouts are declared once as a [`Schema`]; the same declaration drives
//! decoding ([`marshal::decode`]), encoding ([`marshal::encode`]), lazy tree
//! traversal ([`parser::traverse`]) and writing with size backpatching
//! ([`writer::Writer`]). [`rewrite::rewrite`] ties them together to re-encode
//! a whole file.

pub mod bitio;
pub mod boxes;
pub mod bufseek;
pub mod error;
pub mod header;
pub mod known_boxes;
pub mod marshal;
pub mod parser;
pub mod registry;
pub mod rewrite;
pub mod schema;
pub mod util;
pub mod value;
pub mod writer;

pub use boxes::{BoxHeader, BoxPath, FourCC};
pub use error::{Error, ErrorKind, Result};
pub use header::{read_box_header, write_box_header};
pub use known_boxes::default_registry;
pub use parser::{BoxNode, BoxTree, BoxVisitor, extract_boxes, read_box_tree, traverse};
pub use registry::Registry;
pub use rewrite::{RewriteStats, Rewriter, rewrite};
pub use schema::{Context, FieldDef, Schema, SchemaHooks};
pub use value::{BoxValue, Record, Value};
pub use writer::Writer;
