//! Buffer worklist and the top-level dispatch loop.

use std::collections::VecDeque;

use crate::strategy::xref::ShaderRecordPolicy;
use crate::strategy::{self, Context};
use crate::{BufferDescriptor, BufferListing, ClDecoder, Disassembly, PhysicalMemory};

/// Largest window a control list may grow to before it is abandoned
pub const DEFAULT_MAX_CL_SIZE: usize = 512 * 1024;

/// First QPU end-signal search window (512 instructions)
pub const DEFAULT_INITIAL_QPU_SEARCH_SIZE: usize = 4096;

/// Largest QPU end-signal search window
pub const DEFAULT_MAX_QPU_SEARCH_SIZE: usize = 1024 * 1024;

/// Tunables for a disassembly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisassemblerConfig {
    /// Logical size of a control list window before its first growth
    pub initial_window_size: usize,
    /// Control list window cap in bytes
    pub max_cl_size: usize,
    /// First QPU search window in bytes
    pub initial_qpu_search_size: usize,
    /// QPU search window cap in bytes
    pub max_qpu_search_size: usize,
    /// How GL_SHADER references are derived
    pub shader_policy: ShaderRecordPolicy,
}

impl Default for DisassemblerConfig {
    fn default() -> Self {
        Self {
            initial_window_size: 1,
            max_cl_size: DEFAULT_MAX_CL_SIZE,
            initial_qpu_search_size: DEFAULT_INITIAL_QPU_SEARCH_SIZE,
            max_qpu_search_size: DEFAULT_MAX_QPU_SEARCH_SIZE,
            shader_policy: ShaderRecordPolicy::default(),
        }
    }
}

/// FIFO of discovered buffers awaiting disassembly.
///
/// No deduplication: a buffer reachable along two paths is queued, and
/// disassembled, twice.
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    queue: VecDeque<BufferDescriptor>,
}

impl Worklist {
    /// Create an empty worklist
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor
    pub fn push(&mut self, desc: BufferDescriptor) {
        self.queue.push_back(desc);
    }

    /// Remove the oldest descriptor
    pub fn pop(&mut self) -> Option<BufferDescriptor> {
        self.queue.pop_front()
    }

    /// Number of queued descriptors
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued descriptors, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &BufferDescriptor> {
        self.queue.iter()
    }
}

/// Drives the worklist to exhaustion.
pub struct Disassembler<'a> {
    memory: &'a dyn PhysicalMemory,
    decoder: &'a dyn ClDecoder,
    config: DisassemblerConfig,
}

impl<'a> Disassembler<'a> {
    /// Create a disassembler over `memory`
    pub fn new(memory: &'a dyn PhysicalMemory, decoder: &'a dyn ClDecoder, config: DisassemblerConfig) -> Self {
        Self { memory, decoder, config }
    }

    /// The configuration in use
    pub fn config(&self) -> &DisassemblerConfig {
        &self.config
    }

    /// Disassemble `seed` and everything reachable from it
    pub fn run(&self, seed: BufferDescriptor) -> Disassembly {
        let mut worklist = Worklist::new();
        worklist.push(seed);
        self.run_worklist(&mut worklist)
    }

    /// Pop and process descriptors until `worklist` is empty.
    ///
    /// A buffer that fails is recorded with its error and the loop moves on.
    pub fn run_worklist(&self, worklist: &mut Worklist) -> Disassembly {
        let mut disassembly = Disassembly::default();

        log::info!("Starting disassembly with {} queued buffer(s)", worklist.len());

        while let Some(desc) = worklist.pop() {
            disassembly.listings.push(self.process(desc, worklist));
        }

        log::info!(
            "Disassembly complete: {} buffers, {} lines, {} failed",
            disassembly.listings.len(),
            disassembly.line_count(),
            disassembly.failures().count()
        );

        disassembly
    }

    /// Disassemble one buffer, queueing whatever it references
    pub fn process(&self, desc: BufferDescriptor, worklist: &mut Worklist) -> BufferListing {
        let mut listing = BufferListing::new(desc);
        let mut ctx = Context {
            memory: self.memory,
            decoder: self.decoder,
            config: &self.config,
            worklist,
        };

        log::debug!("Disassembling {}", desc);

        if let Err(e) = strategy::run(&desc, &mut ctx, &mut listing.lines) {
            log::error!("Failed to disassemble {}: {}", desc, e);
            listing.error = Some(e.to_string());
        }

        listing
    }
}
