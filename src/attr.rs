//! Primitive attributes: output scale, post-op chain, scratchpad policy.
//!
//! Attributes are built by the caller, then shared read-only with every
//! candidate implementation during dispatch. A candidate that cannot honor
//! them reports `Unimplemented`.

use crate::error::{Error, Result};
use crate::types::EltwiseAlg;

/// Upper bound on the post-op chain length.
pub const MAX_POST_OPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScratchpadMode {
    /// The primitive owns its scratchpad.
    #[default]
    Library,
    /// The caller passes scratchpad memory as `ArgId::SCRATCHPAD`.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostOp {
    /// `dst = scale * alg(dst, alpha, beta)`
    Eltwise {
        alg: EltwiseAlg,
        alpha: f32,
        beta: f32,
        scale: f32,
    },
    /// `dst = dst + scale * dst_prev`
    Sum { scale: f32 },
}

impl PostOp {
    pub fn relu(negative_slope: f32) -> Self {
        PostOp::Eltwise {
            alg: EltwiseAlg::Relu,
            alpha: negative_slope,
            beta: 0.0,
            scale: 1.0,
        }
    }

    pub fn is_relu(&self, require_scale_one: bool, require_nslope_zero: bool) -> bool {
        match *self {
            PostOp::Eltwise {
                alg: EltwiseAlg::Relu,
                alpha,
                scale,
                ..
            } => (!require_scale_one || scale == 1.0) && (!require_nslope_zero || alpha == 0.0),
            _ => false,
        }
    }

    pub fn is_sum(&self) -> bool {
        matches!(self, PostOp::Sum { .. })
    }

    pub fn is_eltwise(&self) -> bool {
        matches!(self, PostOp::Eltwise { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostOps {
    entries: Vec<PostOp>,
}

impl PostOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PostOp] {
        &self.entries
    }

    /// Append an eltwise step. Fails with `OutOfMemory` once the chain is full.
    pub fn append_eltwise(&mut self, scale: f32, alg: EltwiseAlg, alpha: f32, beta: f32) -> Result<()> {
        self.push(PostOp::Eltwise {
            alg,
            alpha,
            beta,
            scale,
        })
    }

    pub fn append_sum(&mut self, scale: f32) -> Result<()> {
        self.push(PostOp::Sum { scale })
    }

    fn push(&mut self, op: PostOp) -> Result<()> {
        if self.entries.len() == MAX_POST_OPS {
            return Err(Error::out_of_memory(format!(
                "post-op chain is limited to {MAX_POST_OPS} entries"
            )));
        }
        self.entries.push(op);
        Ok(())
    }

    /// Position of the single sum step, if the chain has one.
    pub fn find_sum(&self) -> Option<usize> {
        self.entries.iter().position(PostOp::is_sum)
    }

    /// Every step is eltwise or sum, with at most one sum placed first.
    pub fn is_eltwise_chain_with_leading_sum(&self) -> bool {
        let sums = self.entries.iter().filter(|p| p.is_sum()).count();
        sums == 0 || (sums == 1 && self.entries[0].is_sum())
    }

    /// Run the chain on one accumulated value. `prev` is the old destination
    /// value used by a sum step.
    #[inline]
    pub fn apply(&self, mut v: f32, prev: f32) -> f32 {
        for op in &self.entries {
            v = match *op {
                PostOp::Eltwise {
                    alg,
                    alpha,
                    beta,
                    scale,
                } => scale * alg.apply(v, alpha, beta),
                PostOp::Sum { scale } => v + scale * prev,
            };
        }
        v
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveAttr {
    output_scale: f32,
    post_ops: PostOps,
    scratchpad_mode: ScratchpadMode,
}

impl Default for PrimitiveAttr {
    fn default() -> Self {
        Self {
            output_scale: 1.0,
            post_ops: PostOps::default(),
            scratchpad_mode: ScratchpadMode::Library,
        }
    }
}

impl PrimitiveAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_scale(&self) -> f32 {
        self.output_scale
    }

    pub fn set_output_scale(&mut self, scale: f32) -> Result<()> {
        if !scale.is_finite() {
            return Err(Error::invalid(format!("output scale {scale} is not finite")));
        }
        self.output_scale = scale;
        Ok(())
    }

    pub fn post_ops(&self) -> &PostOps {
        &self.post_ops
    }

    pub fn set_post_ops(&mut self, post_ops: PostOps) {
        self.post_ops = post_ops;
    }

    pub fn scratchpad_mode(&self) -> ScratchpadMode {
        self.scratchpad_mode
    }

    pub fn set_scratchpad_mode(&mut self, mode: ScratchpadMode) {
        self.scratchpad_mode = mode;
    }

    /// No scale and no post-ops. Scratchpad mode does not affect results and
    /// is ignored here.
    pub fn has_default_values(&self) -> bool {
        self.output_scale == 1.0 && self.post_ops.is_empty()
    }

    /// The chain is exactly one plain ReLU.
    pub fn with_relu_post_op(&self) -> bool {
        let entries = self.post_ops.entries();
        entries.len() == 1 && entries[0].is_relu(true, true)
    }
}
