//! Ordered candidate implementation lists.
//!
//! For every (engine kind, primitive kind) pair the registry holds the
//! candidates in priority order: specialized first, reference last.
//! Dispatch walks a list and takes the first candidate that accepts. The
//! process-wide registry is built once on first use and never mutated.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::attr::PrimitiveAttr;
use crate::engine::{Engine, EngineKind};
use crate::error::Result;
use crate::impls::{batch_norm, convolution, gemm, reorder, softmax};
use crate::memory_desc::MemoryDesc;
use crate::op_desc::OpDesc;
use crate::primitive_desc::PrimitiveDesc;
use crate::types::PrimitiveKind;

/// Inputs a non-reorder candidate sees.
pub struct PdCreateArgs<'a> {
    pub op_desc: &'a OpDesc,
    pub attr: &'a PrimitiveAttr,
    pub engine: &'a Engine,
}

/// Inputs a reorder candidate sees. `engine` is the executing engine.
pub struct ReorderCreateArgs<'a> {
    pub engine: &'a Engine,
    pub attr: &'a PrimitiveAttr,
    pub src_engine: &'a Engine,
    pub src_md: &'a MemoryDesc,
    pub dst_engine: &'a Engine,
    pub dst_md: &'a MemoryDesc,
}

/// Candidate factory: a resolved descriptor, or `Unimplemented` when the
/// configuration is outside what the implementation handles.
pub type PdCreateFn = fn(&PdCreateArgs<'_>, &'static str) -> Result<PrimitiveDesc>;
pub type ReorderCreateFn = fn(&ReorderCreateArgs<'_>, &'static str) -> Result<PrimitiveDesc>;

#[derive(Clone, Copy)]
pub struct Candidate {
    pub name: &'static str,
    pub create: PdCreateFn,
}

#[derive(Clone, Copy)]
pub struct ReorderCandidate {
    pub name: &'static str,
    pub create: ReorderCreateFn,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate").field("name", &self.name).finish()
    }
}

impl std::fmt::Debug for ReorderCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorderCandidate").field("name", &self.name).finish()
    }
}

#[derive(Debug, Default)]
pub struct ImplRegistry {
    lists: HashMap<(EngineKind, PrimitiveKind), Vec<Candidate>>,
    reorders: HashMap<EngineKind, Vec<ReorderCandidate>>,
}

impl ImplRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate at the lowest priority of its list.
    pub fn register(&mut self, engine: EngineKind, kind: PrimitiveKind, name: &'static str, create: PdCreateFn) {
        self.lists
            .entry((engine, kind))
            .or_default()
            .push(Candidate { name, create });
    }

    pub fn register_reorder(&mut self, engine: EngineKind, name: &'static str, create: ReorderCreateFn) {
        self.reorders
            .entry(engine)
            .or_default()
            .push(ReorderCandidate { name, create });
    }

    /// Candidates for `kind` on `engine`, highest priority first. Empty when
    /// nothing is registered.
    pub fn impl_list(&self, engine: EngineKind, kind: PrimitiveKind) -> &[Candidate] {
        self.lists.get(&(engine, kind)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reorder_impl_list(&self, engine: EngineKind) -> &[ReorderCandidate] {
        self.reorders.get(&engine).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The built-in CPU and GPU lists.
    pub fn with_defaults() -> Self {
        use EngineKind::{Cpu, Gpu};
        use PrimitiveKind::{BatchNormalization, Convolution, Gemm, Softmax};

        let mut r = Self::new();

        // CPU
        r.register_reorder(Cpu, "direct_copy", reorder::create_direct_copy);
        r.register_reorder(Cpu, "direct_copy_cvt", reorder::create_direct_copy_cvt);
        r.register_reorder(Cpu, "ref:any", reorder::create_ref);

        r.register(Cpu, BatchNormalization, "ncsp_bnorm:any", batch_norm::create_ncsp_fwd);
        r.register(Cpu, BatchNormalization, "ncsp_bnorm:any", batch_norm::create_ncsp_bwd);
        r.register(Cpu, BatchNormalization, "ref:any", batch_norm::create_ref_fwd);
        r.register(Cpu, BatchNormalization, "ref:any", batch_norm::create_ref_bwd);

        r.register(Cpu, Softmax, "ref:dense", softmax::create_dense_fwd);
        r.register(Cpu, Softmax, "ref:any", softmax::create_generic_fwd);
        r.register(Cpu, Softmax, "ref:any", softmax::create_generic_bwd);

        r.register(Cpu, Convolution, "ref:any", convolution::create_ref);

        r.register(Cpu, Gemm, "gemm:blocked", gemm::create_blocked);
        r.register(Cpu, Gemm, "ref:any", gemm::create_ref);

        // GPU: reference kernels, executed on host-resident memory
        r.register_reorder(Gpu, "ocl:ref:any", reorder::create_ref);

        r.register(Gpu, BatchNormalization, "ocl:ref:any", batch_norm::create_ref_fwd);
        r.register(Gpu, BatchNormalization, "ocl:ref:any", batch_norm::create_ref_bwd);

        r.register(Gpu, Softmax, "ocl:ref:any", softmax::create_generic_fwd);
        r.register(Gpu, Softmax, "ocl:ref:any", softmax::create_generic_bwd);

        r.register(Gpu, Convolution, "ocl:ref:any", convolution::create_ref);

        r.register(Gpu, Gemm, "ocl:ref:any", gemm::create_ref);

        log::debug!(
            "implementation registry: {} lists, {} reorder lists",
            r.lists.len(),
            r.reorders.len()
        );
        r
    }
}

static REGISTRY: OnceLock<ImplRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static ImplRegistry {
    REGISTRY.get_or_init(ImplRegistry::with_defaults)
}

/// Names in the built-in list for `kind` on `engine`, in priority order.
pub fn impl_names(engine: EngineKind, kind: PrimitiveKind) -> Vec<&'static str> {
    if kind == PrimitiveKind::Reorder {
        registry()
            .reorder_impl_list(engine)
            .iter()
            .map(|c| c.name)
            .collect()
    } else {
        registry()
            .impl_list(engine, kind)
            .iter()
            .map(|c| c.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_lists_end_with_reference() {
        for kind in [
            PrimitiveKind::BatchNormalization,
            PrimitiveKind::Softmax,
            PrimitiveKind::Convolution,
            PrimitiveKind::Gemm,
            PrimitiveKind::Reorder,
        ] {
            let names = impl_names(EngineKind::Cpu, kind);
            assert_eq!(names.last(), Some(&"ref:any"), "{kind:?}");
        }
    }

    #[test]
    fn test_reorder_priority_order() {
        assert_eq!(
            impl_names(EngineKind::Cpu, PrimitiveKind::Reorder),
            vec!["direct_copy", "direct_copy_cvt", "ref:any"]
        );
        assert_eq!(
            impl_names(EngineKind::Gpu, PrimitiveKind::Reorder),
            vec!["ocl:ref:any"]
        );
    }

    #[test]
    fn test_empty_list_for_unregistered_pair() {
        let r = ImplRegistry::new();
        assert!(r.impl_list(EngineKind::Cpu, PrimitiveKind::Gemm).is_empty());
        assert!(r.reorder_impl_list(EngineKind::Gpu).is_empty());
    }

    #[test]
    fn test_register_appends() {
        let mut r = ImplRegistry::new();
        r.register(EngineKind::Cpu, PrimitiveKind::Gemm, "a", gemm::create_ref);
        r.register(EngineKind::Cpu, PrimitiveKind::Gemm, "b", gemm::create_ref);
        let names: Vec<_> = r
            .impl_list(EngineKind::Cpu, PrimitiveKind::Gemm)
            .iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
