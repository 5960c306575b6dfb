//! Object files: compiled functions with symbolic references, serialized with
//! bincode.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{BinaryOp, CmpPredicate, Reg};
use crate::program::stable_hash;

/// Object file errors.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// File could not be read or written.
    #[error("object io error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Bytes are not a valid object file.
    #[error("malformed object: {0}")]
    Codec(#[from] bincode::Error),
}

/// Compiled instruction. Control flow is resolved to indices; calls still
/// name their callee by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectOp {
    /// `dst = value`
    Const {
        /// Destination register.
        dst: Reg,
        /// Immediate.
        value: i64,
    },
    /// `dst = lhs <kind> rhs`
    Binary {
        /// Destination register.
        dst: Reg,
        /// Operation.
        kind: BinaryOp,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// `dst = lhs <pred> rhs`
    Compare {
        /// Destination register.
        dst: Reg,
        /// Predicate.
        pred: CmpPredicate,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Call by symbol.
    Call {
        /// Result register.
        dst: Option<Reg>,
        /// Callee symbol.
        symbol: String,
        /// Argument registers.
        args: Vec<Reg>,
    },
    /// Jump to an instruction index.
    Jump(usize),
    /// Conditional jump.
    Branch {
        /// Condition register.
        cond: Reg,
        /// Taken target.
        then_target: usize,
        /// Fallthrough target.
        else_target: usize,
    },
    /// Return a register, or 0.
    Return(Option<Reg>),
    /// Print a register.
    Print(Reg),
    /// Fault.
    Trap(String),
    /// No operation.
    Nop,
    /// Trampoline.
    Dispatch {
        /// Pristine body symbol.
        pristine: String,
        /// `(mutation id, mutant body symbol)` pairs.
        targets: Vec<(String, String)>,
    },
}

/// One function inside an object file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFunction {
    /// Mangled symbol.
    pub symbol: String,
    /// Parameter count.
    pub params: u32,
    /// Frame size in registers.
    pub registers: u32,
    /// Coverage probe, present in instrumented objects only.
    pub probe: Option<u32>,
    /// Instructions.
    pub code: Vec<ObjectOp>,
}

/// Output of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFile {
    /// Name of the module it was compiled from.
    pub name: String,
    /// Content hash of the compiled module.
    pub source_hash: String,
    /// Whether coverage probes were compiled in.
    pub instrumented: bool,
    /// Function definitions.
    pub functions: Vec<CompiledFunction>,
}

impl ObjectFile {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ObjectError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from bincode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ObjectError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Read an object file from disk.
    pub fn read_from(path: &Path) -> Result<Self, ObjectError> {
        let bytes = std::fs::read(path).map_err(|source| ObjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Write an object file to disk.
    pub fn write_to(&self, path: &Path) -> Result<(), ObjectError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|source| ObjectError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defined symbols.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.symbol.as_str())
    }
}

/// On-disk cache of non-instrumented objects keyed by module content hash.
#[derive(Debug, Clone)]
pub struct ObjectCache {
    directory: PathBuf,
}

impl ObjectCache {
    /// Cache rooted at `directory`. The directory is created lazily.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Cache root.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Entry path for a module hash under a mangling prefix.
    pub fn entry_path(&self, source_hash: &str, mangler_prefix: &str) -> PathBuf {
        let tag = if mangler_prefix.is_empty() {
            "plain".to_string()
        } else {
            format!("p{:016x}", stable_hash(mangler_prefix.as_bytes()))
        };
        self.directory.join(format!("{source_hash}-{tag}.irobj"))
    }

    /// Cached object, if present and readable.
    pub fn load(&self, source_hash: &str, mangler_prefix: &str) -> Option<ObjectFile> {
        let path = self.entry_path(source_hash, mangler_prefix);
        if !path.exists() {
            return None;
        }
        ObjectFile::read_from(&path)
            .ok()
            .filter(|object| object.source_hash == source_hash && !object.instrumented)
    }

    /// Store an object. Instrumented objects are never cached.
    pub fn store(&self, object: &ObjectFile, mangler_prefix: &str) -> Result<(), ObjectError> {
        if object.instrumented {
            return Ok(());
        }
        std::fs::create_dir_all(&self.directory).map_err(|source| ObjectError::Io {
            path: self.directory.clone(),
            source,
        })?;
        object.write_to(&self.entry_path(&object.source_hash, mangler_prefix))
    }
}
