//! Marvin back end — lowers JVM bytecode to Marvin assembly.
//!
//! Module layout:
//! - `tuple`    — bytecode → positional tuples
//! - `cfg`      — basic blocks, control flow, and the per-method passes
//! - `hir`      — SSA high-level IR
//! - `lir`      — register-transfer low-level IR
//! - `liveness` — dataflow liveness sets and intervals
//! - `regalloc` — register allocation strategies
//! - `marvin`   — target instructions and text emission
//! - `regs`     — the sixteen-register machine model

pub mod cfg;
pub mod hir;
pub mod lir;
pub mod liveness;
pub mod marvin;
pub mod regalloc;
pub mod regs;
pub mod tuple;

pub use cfg::Cfg;
pub use regalloc::AllocatorKind;

use crate::classfile::ClassFile;
use log::debug;
use marvin::write_line;
use regs::RA;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// A broken invariant inside the pipeline; names the method at fault.
    #[error("method {method}: {message}")]
    Internal { method: String, message: String },

    #[error("method address not found: {0}")]
    UnknownMethodAddress(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Builtin methods the pipeline never compiles: their bodies are Marvin
/// primitives.
fn is_builtin(name: &str, desc: &str) -> bool {
    (name == "read" && desc == "()I") || (name == "write" && desc == "(I)V")
}

/// Drives the per-method pipelines and performs the global link.
///
/// The program counter starts at 2: addresses 0 and 1 hold the trampoline
/// that calls `main()V` and halts.
pub struct MarvinEmitter {
    allocator: AllocatorKind,
    verbose: bool,
    cfgs: Vec<Cfg>,
    method_addresses: HashMap<String, usize>,
    pc: usize,
    dump_buffer: String,
}

impl MarvinEmitter {
    pub fn new(allocator: AllocatorKind, verbose: bool) -> Self {
        Self {
            allocator,
            verbose,
            cfgs: Vec::new(),
            method_addresses: HashMap::new(),
            pc: 2,
            dump_buffer: String::new(),
        }
    }

    /// Compiles every method of the class through the full pipeline and
    /// assigns global addresses. Call `write_program` afterwards.
    pub fn compile(&mut self, class: &ClassFile) -> Result<(), BackendError> {
        for method in &class.methods {
            let desc = method.descriptor.replace('Z', "I");
            if is_builtin(&method.name, &desc) {
                continue;
            }
            debug!("compiling {}{}", method.name, desc);

            let mut cfg = Cfg::build(&class.constant_pool, method)?;
            cfg.detect_loops(0, None);
            cfg.remove_unreachable_blocks();
            cfg.tuples_to_hir()?;
            cfg.cleanup_phi_functions();
            cfg.hir_to_lir()?;
            cfg.resolve_phi_functions()?;
            cfg.renumber_lir();
            regalloc::allocate(self.allocator, &mut cfg);

            if self.verbose {
                let _ = writeln!(self.dump_buffer, ">>> {}{}\n", cfg.name, cfg.desc);
                self.dump_buffer.push_str(&cfg.dump_tuples());
                self.dump_buffer.push_str(&cfg.dump_hir());
                self.dump_buffer.push_str(&cfg.dump_lir());
                self.dump_buffer.push_str(&cfg.dump_liveness_sets());
                self.dump_buffer.push_str(&cfg.dump_liveness_intervals());
                self.dump_buffer.push('\n');
            }

            cfg.lir_to_marvin()?;
            cfg.prepare_method_entry_and_exit();
            cfg.resolve_jumps(&mut self.pc, &mut self.method_addresses)?;
            self.cfgs.push(cfg);
        }
        Ok(())
    }

    /// The compiled per-method graphs, in declaration order.
    pub fn cfgs(&self) -> &[Cfg] {
        &self.cfgs
    }

    /// IR dumps accumulated when verbose output was requested.
    pub fn dump_output(&self) -> &str {
        &self.dump_buffer
    }

    pub fn method_address(&self, name_and_desc: &str) -> Option<usize> {
        self.method_addresses.get(name_and_desc).copied()
    }

    /// Writes the linked program: the `main()V` trampoline followed by each
    /// method's text segment. Call fixups happen here, after every method
    /// has an address.
    pub fn write_program<W: io::Write>(&mut self, out: &mut W) -> Result<(), BackendError> {
        let main = *self
            .method_addresses
            .get("main()V")
            .ok_or_else(|| BackendError::UnknownMethodAddress("main()V".to_string()))?;
        write_line(
            out,
            0,
            "calln",
            &regs::reg_name(RA),
            &main.to_string(),
            "",
            &format!("call method @{main}"),
        )?;
        write_line(out, 1, "halt", "", "", "", "halt the machine")?;
        writeln!(out)?;

        for i in 0..self.cfgs.len() {
            self.cfgs[i].resolve_calls(&self.method_addresses)?;
            self.cfgs[i].write(out)?;
        }
        Ok(())
    }

    /// Writes the `.marv` file next to `dest_dir`, named after the source
    /// file. Returns the path written.
    pub fn write_file(&mut self, source_file: &Path, dest_dir: &Path) -> Result<PathBuf, BackendError> {
        let stem = source_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        let out_path = dest_dir.join(format!("{stem}.marv"));
        // Build the whole program in memory first; no partial output on error.
        let mut buffer = Vec::new();
        writeln!(buffer, "# {stem}.marv\n")?;
        self.write_program(&mut buffer)?;
        let mut out = BufWriter::new(File::create(&out_path)?);
        out.write_all(&buffer)?;
        out.flush()?;
        Ok(out_path)
    }
}
