//! Core data structures for the dependency graph

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Content signature of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub u64);

/// What the store last recorded about a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    /// Discovered but never reported to the caller. Its dependencies may
    /// already be known.
    Unseen,
    /// Reported as existing with this signature.
    Present(Signature),
    /// Reported as deleted. Kept as a tombstone while dependents still point at it.
    Missing,
}

/// Syntax that produced an import specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSyntax {
    /// `import x from '..'`, `import '..'`, `export .. from '..'`
    Esm,
    /// `import('..')`
    DynamicEsm,
    /// `require('..')`
    CommonJs,
    /// `@import '..'` / `@import url('..')`
    Css,
}

impl ImportSyntax {
    pub fn is_script(self) -> bool {
        !matches!(self, ImportSyntax::Css)
    }
}

/// Which import syntaxes are scanned in a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SyntaxKinds {
    pub esm: bool,
    pub dyn_esm: bool,
    pub cjs: bool,
    pub css: bool,
}

impl SyntaxKinds {
    /// Files that are tracked but never parsed (images, json, unknown extensions).
    pub const NONE: SyntaxKinds = SyntaxKinds {
        esm: false,
        dyn_esm: false,
        cjs: false,
        css: false,
    };

    pub fn is_empty(&self) -> bool {
        !(self.esm || self.dyn_esm || self.cjs || self.css)
    }

    pub fn allows(&self, syntax: ImportSyntax) -> bool {
        match syntax {
            ImportSyntax::Esm => self.esm,
            ImportSyntax::DynamicEsm => self.dyn_esm,
            ImportSyntax::CommonJs => self.cjs,
            ImportSyntax::Css => self.css,
        }
    }
}

/// A specifier that did not resolve when its file was last scanned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnresolvedImport {
    pub specifier: String,
    pub syntax: ImportSyntax,
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: PathBuf,
    pub presence: Presence,
    /// Direct dependencies, deduplicated, in the order they were first imported.
    pub deps: Vec<PathBuf>,
    pub kinds: SyntaxKinds,
    pub unresolved: Vec<UnresolvedImport>,
    /// Signature of the content `deps` were extracted from.
    pub scanned: Option<Signature>,
}

impl FileNode {
    pub fn new(path: impl Into<PathBuf>, kinds: SyntaxKinds) -> Self {
        FileNode {
            path: path.into(),
            presence: Presence::Unseen,
            deps: Vec::new(),
            kinds,
            unresolved: Vec::new(),
            scanned: None,
        }
    }

    pub fn signature(&self) -> Option<Signature> {
        match self.presence {
            Presence::Present(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.presence == Presence::Missing
    }

    pub fn parent_dir(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// State of a single file as observed by one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    NotModified,
    Created,
    Modified,
    Deleted,
}

/// How an entry was affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    DepAdded,
    DepModified,
    DepDeleted,
}

impl ChangeType {
    /// Map a file state to the change reported for an entry. `own` is true when
    /// the changed file is the entry itself.
    pub fn from_state(state: FileState, own: bool) -> Option<ChangeType> {
        let change = match (state, own) {
            (FileState::NotModified, _) => return None,
            (FileState::Created, true) => ChangeType::Added,
            (FileState::Modified, true) => ChangeType::Modified,
            (FileState::Deleted, true) => ChangeType::Deleted,
            (FileState::Created, false) => ChangeType::DepAdded,
            (FileState::Modified, false) => ChangeType::DepModified,
            (FileState::Deleted, false) => ChangeType::DepDeleted,
        };
        Some(change)
    }
}

/// The dependency file behind a `Dep*` change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCause {
    pub file: PathBuf,
    pub state: FileState,
}

/// One affected entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryChange {
    pub change_type: ChangeType,
    pub entry: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ChangeCause>,
    /// Chain from the cause file up to the entry, both inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<PathBuf>>,
}

impl EntryChange {
    pub fn own(change_type: ChangeType, entry: impl Into<PathBuf>) -> Self {
        EntryChange {
            change_type,
            entry: entry.into(),
            cause: None,
            tree: None,
        }
    }

    pub fn dependency(
        change_type: ChangeType,
        entry: impl Into<PathBuf>,
        cause: ChangeCause,
        tree: Vec<PathBuf>,
    ) -> Self {
        EntryChange {
            change_type,
            entry: entry.into(),
            cause: Some(cause),
            tree: Some(tree),
        }
    }
}

/// An entry with every file it transitively depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub path: PathBuf,
    pub deps: Vec<PathBuf>,
}
