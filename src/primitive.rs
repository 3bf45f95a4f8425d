//! Primitive instances: a descriptor plus the resources it needs to run.

use std::sync::Mutex;
use std::time::Instant;

use crate::attr::ScratchpadMode;
use crate::config;
use crate::engine::Engine;
use crate::error::{try_zeroed_bytes, Error, Result};
use crate::impls;
use crate::memory::ExecArgs;
use crate::primitive_desc::PrimitiveDesc;
use crate::stream::Stream;
use crate::types::{ArgId, ArgUsage};

/// What a kernel sees during one execution.
pub(crate) struct ExecCtx<'a, 's> {
    pub(crate) args: ExecArgs<'a>,
    /// At least `scratchpad_size` bytes, contents unspecified.
    pub(crate) scratchpad: &'s mut [u8],
}

/// Executable instance of a primitive descriptor.
#[derive(Debug)]
pub struct Primitive {
    pd: PrimitiveDesc,
    scratchpad: Option<Mutex<Vec<u8>>>,
}

impl Primitive {
    /// Instantiate `pd`, allocating its scratchpad unless the caller
    /// provides one at execution time.
    pub fn new(pd: &PrimitiveDesc) -> Result<Self> {
        let size = pd.scratchpad_size();
        let scratchpad = if size > 0 && pd.attr().scratchpad_mode() == ScratchpadMode::Library {
            Some(Mutex::new(try_zeroed_bytes(size, "primitive scratchpad")?))
        } else {
            None
        };
        Ok(Self {
            pd: pd.clone(),
            scratchpad,
        })
    }

    pub fn pd(&self) -> &PrimitiveDesc {
        &self.pd
    }

    /// Engine a memory bound to `arg` must live on.
    fn expected_engine(&self, arg: ArgId) -> &Engine {
        match self.pd.reorder_engines() {
            Some((src, _)) if arg == ArgId::FROM => src,
            Some((_, dst)) if arg == ArgId::TO => dst,
            _ => self.pd.engine(),
        }
    }

    fn check_args(&self, args: &ExecArgs<'_>) -> Result<()> {
        for arg in ArgId::ALL {
            let bound = match self.pd.arg_usage(arg) {
                ArgUsage::Input => args.has_input(arg),
                ArgUsage::Output => args.has_output(arg),
                ArgUsage::Unused => continue,
            };
            if !bound {
                return Err(Error::invalid(format!(
                    "{}: argument {arg} is missing or bound with the wrong direction",
                    self.pd.impl_info()
                )));
            }
            if args.md_of(arg) != Some(self.pd.arg_md(arg)) {
                return Err(Error::invalid(format!(
                    "{}: argument {arg} does not match {}",
                    self.pd.impl_info(),
                    self.pd.arg_md(arg)
                )));
            }
            if args.engine_of(arg) != Some(self.expected_engine(arg)) {
                return Err(Error::invalid(format!(
                    "{}: argument {arg} lives on the wrong engine",
                    self.pd.impl_info()
                )));
            }
        }
        Ok(())
    }

    /// Run the primitive on `stream`.
    ///
    /// Every argument the descriptor uses must be bound with the descriptor's
    /// memory descriptor; extra arguments are ignored.
    pub fn execute(&self, stream: &Stream, mut args: ExecArgs<'_>) -> Result<()> {
        if stream.engine() != self.pd.engine() {
            return Err(Error::invalid(format!(
                "primitive for {} executed on a {} stream",
                self.pd.engine(),
                stream.engine()
            )));
        }
        self.check_args(&args)?;
        if self.pd.has_zero_dim_memory() {
            return Ok(());
        }

        let start = Instant::now();
        let size = self.pd.scratchpad_size();
        let user_scratchpad = if self.pd.scratchpad_md().is_zero() {
            None
        } else {
            Some(args.take_output(ArgId::SCRATCHPAD)?)
        };
        let mut guard;
        let scratchpad: &mut [u8] = match (user_scratchpad, &self.scratchpad) {
            (Some(mem), _) => &mut mem.as_bytes_mut()[..size],
            (None, Some(owned)) => {
                guard = owned
                    .lock()
                    .map_err(|_| Error::Runtime("scratchpad lock poisoned".into()))?;
                &mut guard[..]
            }
            (None, None) => &mut [],
        };

        let mut ctx = ExecCtx { args, scratchpad };
        stream.install(|| impls::execute(&self.pd, &mut ctx))?;

        if config::verbose_exec() {
            log::info!(
                "verbose,exec,{},{:.3}",
                self.pd,
                start.elapsed().as_secs_f64() * 1e3
            );
        }
        Ok(())
    }
}
