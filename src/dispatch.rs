//! Dispatch: turn a request into the first accepting candidate's descriptor.
//!
//! Both entry points validate their arguments before touching a candidate
//! list. Candidates are tried strictly in list order; `Unimplemented` (or
//! any other rejection) moves on to the next one, `OutOfMemory` ends the
//! search and is returned as is.

use std::time::Instant;

use crate::attr::PrimitiveAttr;
use crate::config;
use crate::engine::{Engine, EngineKind};
use crate::error::{Error, Result};
use crate::impl_list::{registry, Candidate, PdCreateArgs, ReorderCandidate, ReorderCreateArgs};
use crate::memory_desc::{MemoryDesc, MemoryDescWrapper};
use crate::op_desc::OpDesc;
use crate::primitive_desc::PrimitiveDesc;

fn log_created(pd: &PrimitiveDesc, start: Instant) {
    if config::verbose_create() {
        log::info!(
            "verbose,create,{pd},{:.3}",
            start.elapsed().as_secs_f64() * 1e3
        );
    }
}

// =============================================================================
// Operation primitives
// =============================================================================

/// Every candidate that accepts an operation descriptor, in priority order.
///
/// Backward candidates whose workspace does not match the forward hint are
/// skipped. Iteration ends after yielding an `OutOfMemory` error.
pub struct PrimitiveDescIterator<'a> {
    op_desc: &'a OpDesc,
    attr: PrimitiveAttr,
    engine: Engine,
    hint_fwd_pd: Option<&'a PrimitiveDesc>,
    candidates: &'a [Candidate],
    pos: usize,
    done: bool,
}

impl<'a> PrimitiveDescIterator<'a> {
    pub fn new(
        op_desc: Option<&'a OpDesc>,
        attr: Option<&PrimitiveAttr>,
        engine: Option<&Engine>,
        hint_fwd_pd: Option<&'a PrimitiveDesc>,
    ) -> Result<Self> {
        let op_desc = op_desc.ok_or_else(|| Error::invalid("operation descriptor is missing"))?;
        let engine = engine.ok_or_else(|| Error::invalid("engine is missing"))?;
        let candidates = registry().impl_list(engine.kind(), op_desc.kind());
        Self::over(op_desc, attr, engine, hint_fwd_pd, candidates)
    }

    /// Iterator over an explicit candidate list.
    pub(crate) fn over(
        op_desc: &'a OpDesc,
        attr: Option<&PrimitiveAttr>,
        engine: &Engine,
        hint_fwd_pd: Option<&'a PrimitiveDesc>,
        candidates: &'a [Candidate],
    ) -> Result<Self> {
        if let Some(hint) = hint_fwd_pd {
            if hint.kind() != op_desc.kind() || !hint.is_fwd() {
                return Err(Error::invalid(format!(
                    "hint {} {} cannot pair with a {} descriptor",
                    hint.kind().name(),
                    hint.prop_kind().name(),
                    op_desc.kind().name()
                )));
            }
        }
        Ok(Self {
            op_desc,
            attr: attr.cloned().unwrap_or_default(),
            engine: *engine,
            hint_fwd_pd,
            candidates,
            pos: 0,
            done: false,
        })
    }

    /// Name of the candidate tried next.
    pub fn next_candidate(&self) -> Option<&'static str> {
        if self.done {
            return None;
        }
        self.candidates.get(self.pos).map(|c| c.name)
    }
}

impl Iterator for PrimitiveDescIterator<'_> {
    type Item = Result<PrimitiveDesc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(cand) = self.candidates.get(self.pos) {
            self.pos += 1;
            let args = PdCreateArgs {
                op_desc: self.op_desc,
                attr: &self.attr,
                engine: &self.engine,
            };
            match (cand.create)(&args, cand.name) {
                Ok(pd) if !pd.is_fwd() && !pd.compare_ws(self.hint_fwd_pd) => {
                    log::debug!("{}: workspace does not match the forward hint", cand.name);
                }
                Ok(pd) => return Some(Ok(pd)),
                Err(e @ Error::OutOfMemory(_)) => {
                    log::warn!("{}: {e}; abandoning the search", cand.name);
                    self.done = true;
                    return Some(Err(e));
                }
                Err(e) => log::debug!("{}: {e}", cand.name),
            }
        }
        self.done = true;
        None
    }
}

/// Descriptor from the first candidate on `engine` that accepts `op_desc`.
///
/// `attr = None` means default attributes. A backward request with a fused
/// workspace needs `hint_fwd_pd`, the forward descriptor whose workspace it
/// will consume.
pub fn create_primitive_desc(
    op_desc: Option<&OpDesc>,
    attr: Option<&PrimitiveAttr>,
    engine: Option<&Engine>,
    hint_fwd_pd: Option<&PrimitiveDesc>,
) -> Result<PrimitiveDesc> {
    let it = PrimitiveDescIterator::new(op_desc, attr, engine, hint_fwd_pd)?;
    first_accepted(it)
}

fn first_accepted(mut it: PrimitiveDescIterator<'_>) -> Result<PrimitiveDesc> {
    let start = Instant::now();
    match it.next() {
        Some(Ok(pd)) => {
            log_created(&pd, start);
            Ok(pd)
        }
        Some(Err(e)) => Err(e),
        None => Err(Error::unimplemented(format!(
            "no {} implementation for {} on {}",
            it.op_desc.kind().name(),
            it.op_desc.prop_kind().name(),
            it.engine
        ))),
    }
}

// =============================================================================
// Reorder
// =============================================================================

/// Engine that executes a reorder between `src` and `dst`.
///
/// The side with a non-native runtime runs it; when neither is native the
/// CPU side is avoided; otherwise the source engine wins.
pub fn reorder_engine(src: &Engine, dst: &Engine) -> Engine {
    if dst.runtime().is_native() {
        *src
    } else if src.runtime().is_native() {
        *dst
    } else if dst.kind() == EngineKind::Cpu {
        *src
    } else if src.kind() == EngineKind::Cpu {
        *dst
    } else {
        *src
    }
}

/// Descriptor for copying `src_md` on `src_engine` into `dst_md` on
/// `dst_engine`.
pub fn create_reorder_primitive_desc(
    src_md: Option<&MemoryDesc>,
    src_engine: Option<&Engine>,
    dst_md: Option<&MemoryDesc>,
    dst_engine: Option<&Engine>,
    attr: Option<&PrimitiveAttr>,
) -> Result<PrimitiveDesc> {
    let (Some(src_md), Some(src_engine), Some(dst_md), Some(dst_engine)) =
        (src_md, src_engine, dst_md, dst_engine)
    else {
        return Err(Error::invalid("reorder needs both memory descriptors and engines"));
    };
    if src_engine.kind() != dst_engine.kind()
        && src_engine.kind() != EngineKind::Cpu
        && dst_engine.kind() != EngineKind::Cpu
    {
        return Err(Error::invalid(format!(
            "reorder between {src_engine} and {dst_engine} must go through the host"
        )));
    }
    if src_md.is_zero() || dst_md.is_zero() || src_md.is_any() || dst_md.is_any() {
        return Err(Error::invalid("reorder memory descriptors must be concrete"));
    }
    let (src, dst) = (MemoryDescWrapper::new(src_md), MemoryDescWrapper::new(dst_md));
    if !src.consistent_with(&dst) {
        return Err(Error::invalid(format!(
            "inconsistent reorder descriptors {src_md} and {dst_md}"
        )));
    }

    let default_attr = PrimitiveAttr::default();
    let attr = attr.unwrap_or(&default_attr);
    let engine = reorder_engine(src_engine, dst_engine);
    let args = ReorderCreateArgs {
        engine: &engine,
        attr,
        src_engine,
        src_md,
        dst_engine,
        dst_md,
    };
    first_accepted_reorder(registry().reorder_impl_list(engine.kind()), &args)
}

fn first_accepted_reorder(
    candidates: &[ReorderCandidate],
    args: &ReorderCreateArgs<'_>,
) -> Result<PrimitiveDesc> {
    let start = Instant::now();
    for cand in candidates {
        match (cand.create)(args, cand.name) {
            Ok(pd) => {
                log_created(&pd, start);
                return Ok(pd);
            }
            Err(e @ Error::OutOfMemory(_)) => {
                log::warn!("{}: {e}; abandoning the search", cand.name);
                return Err(e);
            }
            Err(e) => log::debug!("{}: {e}", cand.name),
        }
    }
    Err(Error::unimplemented(format!(
        "no reorder implementation for {} -> {} on {}",
        args.src_md, args.dst_md, args.engine
    )))
}
