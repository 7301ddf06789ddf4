//! Import extraction, specifier resolution, graph building, and change detection

pub mod builder;
pub mod config;
pub mod engine;
pub mod entries;
pub mod extractor;
pub mod resolver;


#[cfg(test)]
pub mod test_utils;

pub use builder::{GraphBuilder, Rescan, ScanOutcome};
pub use config::{ConfigError, ProjectConfig, ResolveOptions, SetupOptions, SupportedPaths};
pub use engine::{Candidates, ChangeSet, FileFailure, compute_changes};
pub use entries::{discover_entries, glob_dirs, glob_matches_in};
pub use extractor::{ImportScan, RawImport, extract_imports};
pub use resolver::Resolver;
