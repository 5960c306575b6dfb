use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::program::{FunctionKey, ModuleId, Program};

/// Coverage probe assignment for one instrumented build.
///
/// Every function of every module gets a probe id before instrumented
/// compilation; the ids are dense and follow module then definition order.
#[derive(Debug, Clone, Default)]
pub struct Instrumentation {
    probes: HashMap<FunctionKey, u32>,
    functions: Vec<FunctionKey>,
}

impl Instrumentation {
    /// Assign a probe to every function currently in `program`.
    pub fn record_functions(program: &Program) -> Self {
        let mut out = Self::default();
        for bitcode in program.bitcode() {
            for function in &bitcode.module().functions {
                let key = FunctionKey::new(bitcode.id(), function.name.clone());
                let probe = out.functions.len() as u32;
                out.probes.insert(key.clone(), probe);
                out.functions.push(key);
            }
        }
        out
    }

    /// Probe of a function.
    pub fn probe_for(&self, module: ModuleId, function: &str) -> Option<u32> {
        self.probes
            .get(&FunctionKey::new(module, function))
            .copied()
    }

    /// Function behind a probe.
    pub fn function(&self, probe: u32) -> Option<&FunctionKey> {
        self.functions.get(probe as usize)
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if no function was recorded.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Probe hits of one instrumented run, each with its shallowest call depth.
#[derive(Debug, Default)]
pub struct CallTrace {
    hits: Mutex<BTreeMap<u32, u32>>,
}

impl CallTrace {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit of `probe` at `depth`.
    pub fn record(&self, probe: u32, depth: u32) {
        if let Ok(mut hits) = self.hits.lock() {
            hits.entry(probe)
                .and_modify(|d| *d = (*d).min(depth))
                .or_insert(depth);
        }
    }

    /// `(probe, depth)` pairs ordered by probe.
    pub fn hits(&self) -> Vec<(u32, u32)> {
        self.hits
            .lock()
            .map(|hits| hits.iter().map(|(p, d)| (*p, *d)).collect())
            .unwrap_or_default()
    }
}
