//! Model files: the TOML subset reader, the model-file schema and the
//! `init` template.

pub mod model_file;
pub mod scaffold;
pub mod toml;

pub use model_file::{BlockDeclFile, InputDecl, ModelFile, SearchSettings};
