//! Engines: a device kind plus the runtime that drives it.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Cpu,
    Gpu,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Cpu => "cpu",
            EngineKind::Gpu => "gpu",
        }
    }

    /// Runtime picked by [`Engine::new`].
    pub const fn default_runtime(self) -> RuntimeKind {
        match self {
            EngineKind::Cpu => RuntimeKind::ThreadPool,
            EngineKind::Gpu => RuntimeKind::Ocl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    /// Host code on the calling thread.
    Sequential,
    /// Host code on a worker pool.
    ThreadPool,
    Ocl,
    Sycl,
}

impl RuntimeKind {
    /// Runtimes that execute host code directly.
    pub fn is_native(self) -> bool {
        matches!(self, RuntimeKind::Sequential | RuntimeKind::ThreadPool)
    }

    pub fn name(self) -> &'static str {
        match self {
            RuntimeKind::Sequential => "seq",
            RuntimeKind::ThreadPool => "threadpool",
            RuntimeKind::Ocl => "ocl",
            RuntimeKind::Sycl => "sycl",
        }
    }
}

/// Handle to one device. Engines are small values; two handles with the same
/// kind, runtime and index denote the same engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Engine {
    kind: EngineKind,
    runtime: RuntimeKind,
    index: usize,
}

impl Engine {
    /// Engine with the default runtime for its kind.
    pub fn new(kind: EngineKind, index: usize) -> Result<Self> {
        Self::with_runtime(kind, kind.default_runtime(), index)
    }

    pub fn with_runtime(kind: EngineKind, runtime: RuntimeKind, index: usize) -> Result<Self> {
        let supported = match kind {
            EngineKind::Cpu => matches!(
                runtime,
                RuntimeKind::Sequential | RuntimeKind::ThreadPool | RuntimeKind::Sycl
            ),
            EngineKind::Gpu => matches!(runtime, RuntimeKind::Ocl | RuntimeKind::Sycl),
        };
        if !supported {
            return Err(Error::invalid(format!(
                "{} engine cannot use the {} runtime",
                kind.name(),
                runtime.name()
            )));
        }
        if kind == EngineKind::Cpu && index != 0 {
            return Err(Error::invalid(format!("cpu engine index {index} out of range")));
        }
        Ok(Self {
            kind,
            runtime,
            index,
        })
    }

    /// The host engine.
    pub const fn cpu() -> Self {
        Self {
            kind: EngineKind::Cpu,
            runtime: RuntimeKind::ThreadPool,
            index: 0,
        }
    }

    /// Accelerator engine `index` on the OpenCL runtime.
    pub const fn gpu(index: usize) -> Self {
        Self {
            kind: EngineKind::Gpu,
            runtime: RuntimeKind::Ocl,
            index,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// `kind:index`, suffixed with `:runtime` when it is not the kind's default.
impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.index)?;
        if self.runtime != self.kind.default_runtime() {
            write!(f, ":{}", self.runtime.name())?;
        }
        Ok(())
    }
}
