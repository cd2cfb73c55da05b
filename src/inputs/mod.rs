//! Test inputs: byte sequences produced on demand.
//!
//! An input is only a recipe for answering byte requests; it grows lazily as
//! the target asks for more data and is trimmed back to what was actually
//! requested once the run finishes. Two representations exist: a flat byte
//! vector ([`LinearInput`]) and a map keyed by execution index
//! ([`MappedInput`]), the latter keeping byte identities stable across runs
//! that share a program path.

pub mod linear;
pub mod mapped;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use linear::LinearInput;
pub use mapped::{MappedInput, SpliceContext};

use crate::{config::GuidanceConfig, rands::Rand, Error};

/// Mean number of mutations to perform in each havoc round.
pub const MEAN_MUTATION_COUNT: f64 = 8.0;

/// Mean number of contiguous bytes to mutate in each mutation.
pub const MEAN_MUTATION_SIZE: f64 = 4.0;

/// Max number of contiguous bytes to splice in from another input.
pub const MAX_SPLICE_SIZE: usize = 64;

/// The byte-generation limits shared by both input representations.
#[derive(Copy, Clone, Debug)]
pub struct GenerationPolicy {
    /// Byte cap per input; requests past it see EOF
    pub max_input_size: usize,
    /// On exhaustion, return EOF instead of drawing a random byte
    pub generate_eof_when_out: bool,
}

impl From<&GuidanceConfig> for GenerationPolicy {
    fn from(config: &GuidanceConfig) -> Self {
        Self {
            max_input_size: config.max_input_size,
            generate_eof_when_out: config.generate_eof_when_out,
        }
    }
}

/// The concrete representation of an input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InputRepr {
    /// Ordered byte vector, keyed by request number
    Linear(LinearInput),
    /// Byte map keyed by execution index
    Mapped(MappedInput),
}

/// A candidate or saved test input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Input {
    /// How this input came to be ("random", "seed", "src:NNNNNN,havoc:M", ...)
    pub desc: String,
    /// Whether this input led to a valid (assumption-satisfying) run
    pub valid: bool,
    /// The underlying representation
    pub repr: InputRepr,
}

impl Input {
    /// A fresh, empty linear input.
    #[must_use]
    pub fn fresh_linear() -> Self {
        Self {
            desc: "random".into(),
            valid: false,
            repr: InputRepr::Linear(LinearInput::new()),
        }
    }

    /// A fresh, empty mapped input.
    #[must_use]
    pub fn fresh_mapped() -> Self {
        Self {
            desc: "random".into(),
            valid: false,
            repr: InputRepr::Mapped(MappedInput::new()),
        }
    }

    /// A linear input whose fresh bytes are served from a seed file first,
    /// falling back to the regular fresh-byte path once the file runs out.
    ///
    /// # Errors
    ///
    /// If the seed file cannot be read.
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(Self {
            desc: "seed".into(),
            valid: false,
            repr: InputRepr::Linear(LinearInput::from_seed_file(path)?),
        })
    }

    /// The current size of the input, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.repr {
            InputRepr::Linear(linear) => linear.size(),
            InputRepr::Mapped(mapped) => mapped.size(),
        }
    }

    /// Drops whatever was never requested during the last run. For mapped
    /// inputs this also freezes the input against further generation.
    pub fn gc(&mut self) {
        match &mut self.repr {
            InputRepr::Linear(linear) => linear.gc(),
            InputRepr::Mapped(mapped) => mapped.gc(),
        }
    }

    /// Serializes the input to the byte sequence the target consumed,
    /// in request order.
    #[must_use]
    pub fn dump_bytes(&self) -> Vec<u8> {
        match &self.repr {
            InputRepr::Linear(linear) => linear.bytes().to_vec(),
            InputRepr::Mapped(mapped) => mapped.request_ordered_bytes(),
        }
    }

    /// Breeds a new input from this one by splicing and/or havoc mutation.
    ///
    /// `parent_id` is the stable id of this input in the corpus, used for
    /// the child's provenance string and to reject self-splices.
    ///
    /// # Errors
    ///
    /// If this input was never executed (mapped inputs only).
    pub fn fuzz<R: Rand>(
        &self,
        parent_id: usize,
        rand: &mut R,
        splice: Option<&SpliceContext>,
    ) -> Result<Input, Error> {
        let mut desc = format!("src:{parent_id:06}");
        let repr = match &self.repr {
            InputRepr::Linear(linear) => {
                let (child, how) = linear.fuzz(rand);
                desc.push_str(&how);
                InputRepr::Linear(child)
            }
            InputRepr::Mapped(mapped) => {
                let (child, how) = mapped.fuzz(rand, splice)?;
                desc.push_str(&how);
                InputRepr::Mapped(child)
            }
        };
        Ok(Input {
            desc,
            valid: false,
            repr,
        })
    }
}
