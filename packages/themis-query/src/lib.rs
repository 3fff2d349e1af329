//! AQL parsing, translation/optimization, and execution (spec §4.9-§4.11),
//! plus the hybrid BM25/HNSW fusion ranking used by the admin facade's
//! fulltext/vector/fusion search operations (spec §4.7).

pub mod ast;
pub mod cte_cache;
pub mod eval;
pub mod executor;
pub mod fusion;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod plan;

pub use executor::{execute, EntityReader, QueryContext};
pub use fusion::{fuse, FusionStrategy};
pub use optimizer::{translate, TranslatedQuery};
pub use parser::parse;
