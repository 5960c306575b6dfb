//! The program under test: an arena of bitcode modules plus the native
//! artifacts that accompany them.

mod bitcode;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bitcode::{ApplicationError, ApplicationStage, Bitcode};

use crate::ir::{Function, Module};
use crate::toolchain::{ObjectError, ObjectFile};

/// Index of a module inside its [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

/// Program-wide function identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    /// Owning module.
    pub module: ModuleId,
    /// Function name within the module.
    pub name: String,
}

impl FunctionKey {
    /// Build a key.
    pub fn new(module: ModuleId, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }
}

/// Program loading errors.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Module file could not be read.
    #[error("cannot read module {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Module file is not valid IR JSON.
    #[error("cannot parse module {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Precompiled object could not be loaded.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),
}

/// FNV-1a 64-bit. Stable across runs and platforms.
pub fn stable_hash(input: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for b in input {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Bitcode modules, dynamic libraries to preload and precompiled objects.
#[derive(Debug, Default)]
pub struct Program {
    bitcode: Vec<Bitcode>,
    dynamic_library_paths: Vec<PathBuf>,
    precompiled_objects: Vec<ObjectFile>,
}

impl Program {
    /// Program made of in-memory modules.
    pub fn new(modules: Vec<Module>) -> Self {
        let bitcode = modules
            .into_iter()
            .enumerate()
            .map(|(index, module)| Bitcode::new(ModuleId(index), module))
            .collect();
        Self {
            bitcode,
            ..Self::default()
        }
    }

    /// Load JSON modules from disk.
    pub fn from_module_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ProgramError> {
        let mut modules = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let module = Module::from_json(&text).map_err(|source| ProgramError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            modules.push(module);
        }
        Ok(Self::new(modules))
    }

    /// Attach dynamic libraries to preload before tests run.
    pub fn with_dynamic_libraries(mut self, paths: Vec<PathBuf>) -> Self {
        self.dynamic_library_paths = paths;
        self
    }

    /// Attach already compiled objects that join every link set.
    pub fn with_precompiled_objects(mut self, objects: Vec<ObjectFile>) -> Self {
        self.precompiled_objects = objects;
        self
    }

    /// Read precompiled objects from disk and attach them.
    pub fn load_precompiled_objects<P: AsRef<Path>>(
        mut self,
        paths: &[P],
    ) -> Result<Self, ProgramError> {
        for path in paths {
            self.precompiled_objects.push(ObjectFile::read_from(path.as_ref())?);
        }
        Ok(self)
    }

    /// All bitcode modules.
    pub fn bitcode(&self) -> &[Bitcode] {
        &self.bitcode
    }

    /// All bitcode modules, mutably.
    pub fn bitcode_mut(&mut self) -> &mut [Bitcode] {
        &mut self.bitcode
    }

    /// Module by id.
    pub fn bitcode_for(&self, id: ModuleId) -> Option<&Bitcode> {
        self.bitcode.get(id.0)
    }

    /// Module by id, mutably.
    pub fn bitcode_for_mut(&mut self, id: ModuleId) -> Option<&mut Bitcode> {
        self.bitcode.get_mut(id.0)
    }

    /// Resolve a function key to its current definition.
    pub fn function(&self, key: &FunctionKey) -> Option<&Function> {
        self.bitcode_for(key.module)?.module().function(&key.name)
    }

    /// Dynamic libraries to preload.
    pub fn dynamic_library_paths(&self) -> &[PathBuf] {
        &self.dynamic_library_paths
    }

    /// Precompiled objects.
    pub fn precompiled_objects(&self) -> &[ObjectFile] {
        &self.precompiled_objects
    }
}
