//! Memory objects and execution-argument bundles.
//!
//! A `Memory` pairs a concrete descriptor with a zero-initialized host
//! buffer sized by the descriptor (padding included). Buffers are host
//! resident for every engine kind.

use std::collections::BTreeMap;

use crate::engine::Engine;
use crate::error::{try_zeroed_bytes, Error, Result};
use crate::memory_desc::{check_layout, MemoryDesc, MemoryDescWrapper};
use crate::types::{ArgId, DataType, Dim};

#[derive(Debug, Clone)]
pub struct Memory {
    md: MemoryDesc,
    engine: Engine,
    data: Vec<u8>,
}

impl Memory {
    /// Allocate zeroed storage for `md` on `engine`.
    pub fn new(md: &MemoryDesc, engine: &Engine) -> Result<Self> {
        let mdw = MemoryDescWrapper::new(md);
        if !mdw.is_blocking_desc() {
            return Err(Error::invalid(format!(
                "cannot allocate memory for a descriptor with format {}",
                mdw.format_str()
            )));
        }
        check_layout(md)?;
        let data = try_zeroed_bytes(mdw.size(), "memory storage")?;
        Ok(Self {
            md: *md,
            engine: *engine,
            data,
        })
    }

    /// Allocate and fill from `values` given in row-major logical order.
    pub fn from_f32(md: &MemoryDesc, engine: &Engine, values: &[f32]) -> Result<Self> {
        let mut mem = Self::new(md, engine)?;
        mem.fill_from_f32(values)?;
        Ok(mem)
    }

    pub fn md(&self) -> &MemoryDesc {
        &self.md
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn data_type(&self) -> DataType {
        self.md.data_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Element at a physical offset, converted to f32.
    #[inline]
    pub fn read_f32(&self, off: Dim) -> f32 {
        let dt = self.md.data_type;
        let at = off as usize * dt.size();
        dt.load_f32(&self.data[at..at + dt.size()])
    }

    /// Store `v` at a physical offset, converting to the element type.
    #[inline]
    pub fn write_f32(&mut self, off: Dim, v: f32) {
        let dt = self.md.data_type;
        let at = off as usize * dt.size();
        dt.store_f32(v, &mut self.data[at..at + dt.size()]);
    }

    /// Overwrite all logical elements; padding is left untouched.
    pub fn fill_from_f32(&mut self, values: &[f32]) -> Result<()> {
        let md = self.md;
        let mdw = MemoryDescWrapper::new(&md);
        let n = mdw.nelems(false);
        if values.len() as Dim != n {
            return Err(Error::invalid(format!(
                "expected {n} values, got {}",
                values.len()
            )));
        }
        for (l, &v) in values.iter().enumerate() {
            self.write_f32(mdw.off_l(l as Dim), v);
        }
        Ok(())
    }

    /// Logical elements in row-major order.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mdw = MemoryDescWrapper::new(&self.md);
        (0..mdw.nelems(false))
            .map(|l| self.read_f32(mdw.off_l(l)))
            .collect()
    }
}

/// Arguments for one execution, keyed by [`ArgId`].
///
/// Inputs are shared borrows; outputs are exclusive borrows handed to the
/// kernel one at a time.
#[derive(Default)]
pub struct ExecArgs<'a> {
    inputs: BTreeMap<ArgId, &'a Memory>,
    outputs: BTreeMap<ArgId, &'a mut Memory>,
}

impl<'a> ExecArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, id: ArgId, mem: &'a Memory) -> Self {
        self.inputs.insert(id, mem);
        self
    }

    pub fn output(mut self, id: ArgId, mem: &'a mut Memory) -> Self {
        self.outputs.insert(id, mem);
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn has_input(&self, id: ArgId) -> bool {
        self.inputs.contains_key(&id)
    }

    pub(crate) fn has_output(&self, id: ArgId) -> bool {
        self.outputs.contains_key(&id)
    }

    /// Descriptor of whichever memory is bound to `id`.
    pub(crate) fn md_of(&self, id: ArgId) -> Option<&MemoryDesc> {
        self.inputs
            .get(&id)
            .map(|m| m.md())
            .or_else(|| self.outputs.get(&id).map(|m| m.md()))
    }

    pub(crate) fn engine_of(&self, id: ArgId) -> Option<&Engine> {
        self.inputs
            .get(&id)
            .map(|m| m.engine())
            .or_else(|| self.outputs.get(&id).map(|m| m.engine()))
    }

    pub(crate) fn get_input(&self, id: ArgId) -> Result<&'a Memory> {
        self.inputs
            .get(&id)
            .copied()
            .ok_or_else(|| Error::invalid(format!("missing input argument {id}")))
    }

    pub(crate) fn take_output(&mut self, id: ArgId) -> Result<&'a mut Memory> {
        self.outputs
            .remove(&id)
            .ok_or_else(|| Error::invalid(format!("missing output argument {id}")))
    }
}
