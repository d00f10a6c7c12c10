mod context;
mod graph;
mod initializer;
mod key;
mod path;
mod provider;
pub(crate) mod toposort;

pub use context::Context;
pub use graph::{DEFAULT_SLOW_THRESHOLD, DependencyGraph, GraphSnapshot, ProviderInfo};
pub use initializer::Initializer;
pub use key::{PackageName, ProviderKey};
pub use path::InstantiationPath;
pub use provider::{Provider, Scope};
