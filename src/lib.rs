//! dnn-primitives: descriptor/primitive engine for deep-learning operators.
//!
//! Callers describe an operation declaratively (shapes, data types, memory
//! layouts, propagation kind, fused post-ops). Dispatch walks the ordered
//! candidate list registered for the target engine and returns the first
//! implementation that accepts the configuration:
//!
//! - **Memory descriptors**: plain, strided and blocked layouts with a
//!   query wrapper ([`MemoryDescWrapper`]).
//! - **Primitive descriptors**: one contract for every operation kind
//!   (argument usage, argument memory descriptors, workspace and scratchpad).
//! - **Reorders** between layouts, data types and engines.
//! - **Reference kernels** for batch normalization, softmax, convolution and
//!   gemm, parallelized over the stream's worker pool.
//!
//! # Quick Start
//!
//! ```no_run
//! use dnn_primitives::{
//!     create_reorder_primitive_desc, ArgId, DataType, Engine, ExecArgs, FormatTag, Memory,
//!     MemoryDesc, Primitive, Stream,
//! };
//!
//! # fn main() -> dnn_primitives::Result<()> {
//! let cpu = Engine::cpu();
//! let src_md = MemoryDesc::new(&[2, 16, 4, 4], DataType::F32, FormatTag::NCHW)?;
//! let dst_md = MemoryDesc::new(&[2, 16, 4, 4], DataType::F32, FormatTag::N_CHW16C)?;
//! let pd = create_reorder_primitive_desc(Some(&src_md), Some(&cpu), Some(&dst_md), Some(&cpu), None)?;
//!
//! let src = Memory::new(&src_md, &cpu)?;
//! let mut dst = Memory::new(&dst_md, &cpu)?;
//! let stream = Stream::new(&cpu)?;
//! Primitive::new(&pd)?.execute(
//!     &stream,
//!     ExecArgs::new().input(ArgId::FROM, &src).output(ArgId::TO, &mut dst),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod attr;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod impl_list;
mod impls;
pub mod isa;
pub mod memory;
pub mod memory_desc;
pub mod op_desc;
pub mod parallel;
pub mod primitive;
pub mod primitive_desc;
pub mod stream;
pub mod types;

pub use attr::{PostOp, PostOps, PrimitiveAttr, ScratchpadMode, MAX_POST_OPS};
pub use config::{config, RuntimeConfig};
pub use dispatch::{
    create_primitive_desc, create_reorder_primitive_desc, reorder_engine, PrimitiveDescIterator,
};
pub use engine::{Engine, EngineKind, RuntimeKind};
pub use error::{status_of, Error, Result, Status};
pub use impl_list::{impl_names, registry, ImplRegistry};
pub use isa::{max_cpu_isa, mayiuse, set_max_cpu_isa, CpuIsa};
pub use memory::{ExecArgs, Memory};
pub use memory_desc::{FormatKind, FormatTag, MemoryDesc, MemoryDescWrapper, ZERO_MD};
pub use op_desc::{
    BatchNormDesc, BatchNormFlags, ConvolutionDesc, ConvShape, GemmDesc, OpDesc, SoftmaxDesc,
};
pub use primitive::Primitive;
pub use primitive_desc::{PrimitiveDesc, Query, QueryValue};
pub use stream::Stream;
pub use types::{
    ArgId, ArgUsage, ConvAlg, DataType, Dim, EltwiseAlg, PrimitiveKind, PropKind, SoftmaxAlg,
};
