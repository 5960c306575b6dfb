//! Compiler, name mangling, object files and linking.

mod compiler;
mod linker;
mod object;

use std::path::PathBuf;

pub use compiler::{CompileError, Compiler};
pub use linker::{Image, Inst, JitEngine, LinkError, LinkedFunction};
pub use object::{CompiledFunction, ObjectCache, ObjectError, ObjectFile, ObjectOp};

use crate::diagnostics::Diagnostics;
use crate::execution::Instrumentation;
use crate::program::Bitcode;

/// Maps IR function names to object symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mangler {
    prefix: String,
}

impl Default for Mangler {
    fn default() -> Self {
        Self::native()
    }
}

impl Mangler {
    /// Platform convention: a leading underscore on macOS, none elsewhere.
    pub fn native() -> Self {
        let prefix = if cfg!(target_os = "macos") { "_" } else { "" };
        Self::with_prefix(prefix)
    }

    /// Explicit symbol prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Symbol prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Symbol for `name`.
    pub fn mangle(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// IR name for `symbol`, if it carries this mangler's prefix.
    pub fn demangle<'a>(&self, symbol: &'a str) -> Option<&'a str> {
        symbol.strip_prefix(self.prefix.as_str())
    }
}

/// Compiler plus mangler plus optional object cache.
#[derive(Debug, Clone)]
pub struct Toolchain {
    compiler: Compiler,
    mangler: Mangler,
    cache: Option<ObjectCache>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new(Mangler::native())
    }
}

impl Toolchain {
    /// Toolchain without a cache.
    pub fn new(mangler: Mangler) -> Self {
        Self {
            compiler: Compiler::new(mangler.clone()),
            mangler,
            cache: None,
        }
    }

    /// Cache non-instrumented objects under `directory`.
    pub fn with_cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache = Some(ObjectCache::new(directory));
        self
    }

    /// Compiler.
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Mangler.
    pub fn mangler(&self) -> &Mangler {
        &self.mangler
    }

    /// Object cache, if configured.
    pub fn cache(&self) -> Option<&ObjectCache> {
        self.cache.as_ref()
    }

    /// Compile one module. Non-instrumented output goes through the cache;
    /// cache failures only warn.
    pub fn compile(
        &self,
        bitcode: &Bitcode,
        instrumentation: Option<&Instrumentation>,
        diagnostics: &Diagnostics,
    ) -> Result<ObjectFile, CompileError> {
        let cache = match (&self.cache, instrumentation) {
            (Some(cache), None) => Some(cache),
            _ => None,
        };
        let hash = bitcode.current_hash();

        if let Some(cache) = cache {
            if let Some(object) = cache.load(&hash, self.mangler.prefix()) {
                diagnostics.debug(format!("Object cache hit for {}", bitcode.module().name));
                return Ok(object);
            }
        }

        let object = self.compiler.compile(bitcode, instrumentation)?;

        if let Some(cache) = cache {
            if let Err(err) = cache.store(&object, self.mangler.prefix()) {
                diagnostics.warning(format!(
                    "Cannot cache object for {}: {err}",
                    bitcode.module().name
                ));
            }
        }
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Module};
    use crate::program::Program;

    #[test]
    fn mangler_roundtrips_prefixed_names() {
        let mangler = Mangler::with_prefix("_");
        assert_eq!(mangler.mangle("main"), "_main");
        assert_eq!(mangler.demangle("_main"), Some("main"));
        assert_eq!(mangler.demangle("main"), None);
        assert_eq!(Mangler::with_prefix("").demangle("main"), Some("main"));
    }

    #[test]
    fn cached_compile_reuses_objects() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut f = FunctionBuilder::new("f", 0);
        let v = f.constant(3);
        f.ret(v);
        let program =
            Program::new(vec![Module::new("f.c").with_function(f.finish().expect("f builds"))]);
        let toolchain = Toolchain::new(Mangler::with_prefix("")).with_cache_directory(dir.path());
        let diagnostics = Diagnostics::capturing();

        let first = toolchain
            .compile(&program.bitcode()[0], None, &diagnostics)
            .expect("first compile");
        let second = toolchain
            .compile(&program.bitcode()[0], None, &diagnostics)
            .expect("second compile");
        assert_eq!(first, second);
        assert!(diagnostics.messages().iter().any(|m| m.message.contains("cache hit")));
    }
}
