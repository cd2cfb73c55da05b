//! The mapped input representation: bytes keyed by execution index.
//!
//! Until it is executed, a mapped input answers byte requests out of its
//! map, growing lazily. After execution and [`MappedInput::gc`] it freezes:
//! the request-ordered key list becomes the serialization order, offsets
//! into that list become stable, and all further changes go through
//! [`MappedInput::fuzz`], which breeds a fresh, unexecuted child.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    corpus::{Corpus, InputLocation},
    ei::{ExecutionContext, ExecutionIndex},
    inputs::{GenerationPolicy, InputRepr, MAX_SPLICE_SIZE, MEAN_MUTATION_COUNT, MEAN_MUTATION_SIZE},
    rands::{sample_geometric, Rand},
    Error,
};

/// Everything a mapped input needs to splice from the rest of the corpus:
/// the execution-context index over saved splice locations, the corpus
/// itself, and the identity of the parent (so it does not splice from
/// itself).
#[derive(Debug)]
pub struct SpliceContext<'a> {
    /// Splice locations grouped by execution context
    pub locations: &'a HashMap<ExecutionContext, Vec<InputLocation>>,
    /// The saved-inputs corpus the locations point into
    pub corpus: &'a Corpus,
    /// Corpus index of the input being fuzzed, if it is saved
    pub parent: Option<usize>,
    /// Splice whole execution subtrees instead of flat byte spans
    pub subtree: bool,
}

impl SpliceContext<'_> {
    fn source(&self, idx: usize) -> Option<(&MappedInput, usize)> {
        let testcase = self.corpus.get(idx).ok()?;
        match &testcase.input().repr {
            InputRepr::Mapped(mapped) => Some((mapped, testcase.id())),
            InputRepr::Linear(_) => None,
        }
    }
}

/// A test input represented as a map from execution indices to bytes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MappedInput {
    /// Byte value for every known execution index
    values: HashMap<ExecutionIndex, u8>,
    /// Unique keys of `values`, in insertion order
    map_order: Vec<ExecutionIndex>,
    /// Keys in the order they were requested during the last run; may
    /// contain duplicates when the target re-reads an index
    ordered_keys: Vec<ExecutionIndex>,
    /// Set once the input has run and been trimmed; freezes the input
    executed: bool,
}

impl MappedInput {
    /// Creates an empty input map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The size of this input: the number of mapped bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Whether this input has been executed and frozen.
    #[must_use]
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// The bytes of this input in the order the target requested them.
    #[must_use]
    pub fn request_ordered_bytes(&self) -> Vec<u8> {
        self.ordered_keys
            .iter()
            .filter_map(|key| self.values.get(key).copied())
            .collect()
    }

    /// The execution index requested at `offset` during the last run.
    ///
    /// # Errors
    ///
    /// If the input has not been executed yet, or `offset` is out of range.
    pub fn key_at_offset(&self, offset: usize) -> Result<&ExecutionIndex, Error> {
        if !self.executed {
            return Err(Error::illegal_state("cannot index by offset before execution"));
        }
        self.ordered_keys
            .get(offset)
            .ok_or_else(|| Error::illegal_argument(format!("offset {offset} out of range")))
    }

    /// The byte requested at `offset` during the last run.
    ///
    /// # Errors
    ///
    /// If the input has not been executed yet, or `offset` is out of range.
    pub fn value_at_offset(&self, offset: usize) -> Result<u8, Error> {
        let key = self.key_at_offset(offset)?;
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| Error::illegal_state("requested key lost its mapping"))
    }

    /// The byte mapped at `key`, if any.
    #[must_use]
    pub fn value_at_key(&self, key: &ExecutionIndex) -> Option<u8> {
        self.values.get(key).copied()
    }

    fn put(&mut self, key: ExecutionIndex, value: u8) {
        if self.values.insert(key.clone(), value).is_none() {
            self.map_order.push(key);
        }
    }

    /// Serves a byte request at the given execution index, generating a
    /// fresh byte if the index is unmapped. Returns `None` for EOF.
    ///
    /// # Errors
    ///
    /// If the input was already executed; frozen inputs cannot grow.
    pub fn get_or_generate_fresh<R: Rand>(
        &mut self,
        key: &ExecutionIndex,
        rand: &mut R,
        policy: GenerationPolicy,
    ) -> Result<Option<u8>, Error> {
        if self.executed {
            return Err(Error::illegal_state("cannot generate fresh values after execution"));
        }

        // If we reached a limit, then just return EOF
        if self.ordered_keys.len() >= policy.max_input_size {
            return Ok(None);
        }

        let value = match self.values.get(key) {
            Some(value) => *value,
            None => {
                if policy.generate_eof_when_out {
                    return Ok(None);
                }
                let value = rand.next_byte();
                self.put(key.clone(), value);
                value
            }
        };

        self.ordered_keys.push(key.clone());
        Ok(Some(value))
    }

    /// Trims the map of all keys that were never requested since
    /// construction, then freezes the input.
    pub fn gc(&mut self) {
        let mut values = HashMap::with_capacity(self.ordered_keys.len());
        let mut map_order = Vec::with_capacity(self.ordered_keys.len());
        for key in &self.ordered_keys {
            if let Some(value) = self.values.get(key) {
                if values.insert(key.clone(), *value).is_none() {
                    map_order.push(key.clone());
                }
            }
        }
        self.values = values;
        self.map_order = map_order;
        self.executed = true;
    }

    /// Breeds a new input from this one, by splicing from the corpus and/or
    /// stacking havoc mutations. Returns the child and a provenance fragment.
    ///
    /// # Errors
    ///
    /// If this input has not been executed yet.
    pub fn fuzz<R: Rand>(
        &self,
        rand: &mut R,
        splice: Option<&SpliceContext>,
    ) -> Result<(MappedInput, String), Error> {
        let mut child = MappedInput {
            values: self.values.clone(),
            map_order: self.map_order.clone(),
            ordered_keys: Vec::new(),
            executed: false,
        };
        let mut desc = String::new();

        let mut splicing_done = false;
        if let Some(ctx) = splice {
            if !child.values.is_empty() && rand.coinflip(0.5) {
                splicing_done = self.try_splice(&mut child, &mut desc, rand, ctx)?;
            }
        }

        if !splicing_done || rand.coinflip(0.5) {
            self.havoc(&mut child, &mut desc, rand);
        }

        Ok((child, desc))
    }

    fn try_splice<R: Rand>(
        &self,
        child: &mut MappedInput,
        desc: &mut String,
        rand: &mut R,
        ctx: &SpliceContext,
    ) -> Result<bool, Error> {
        const MIN_TARGET_ATTEMPTS: usize = 3;
        const MAX_TARGET_ATTEMPTS: usize = 6;
        const CANDIDATE_ATTEMPTS: usize = 10;

        let mut target_attempts = MIN_TARGET_ATTEMPTS;
        let mut target_attempt = 1;

        while target_attempt < target_attempts {
            target_attempt += 1;

            // Target key and value come from `self`, which has already been
            // executed, rather than from the fresh child
            let target_offset = rand.below(child.values.len());
            let target_ei = self.key_at_offset(target_offset)?.clone();
            let target_ec = target_ei.context();
            let value_at_target = self.value_at_offset(target_offset)?;

            let input_locations = match ctx.locations.get(&target_ec) {
                Some(locations) if !locations.is_empty() => locations,
                _ => {
                    // Bad choice of target; allow another try without penalty
                    target_attempts = usize::min(target_attempts + 1, MAX_TARGET_ATTEMPTS);
                    continue;
                }
            };

            for _ in 0..CANDIDATE_ATTEMPTS {
                let location = match rand.choose(input_locations) {
                    Some(location) => *location,
                    None => break,
                };

                // Do not splice with ourselves
                if ctx.parent == Some(location.input) {
                    continue;
                }
                let Some((source, source_id)) = ctx.source(location.input) else {
                    continue;
                };

                // Do not splice if the first value is the same in source and target
                if source.value_at_offset(location.offset)? == value_at_target {
                    continue;
                }

                let spliced_bytes = if ctx.subtree {
                    let count = splice_subtree(child, &target_ei, source, location.offset)?;
                    if count == 0 {
                        continue;
                    }
                    count
                } else {
                    splice_span(child, self, target_offset, source, location.offset, rand)?
                };

                desc.push_str(&format!(
                    ",splice:{source_id:06}:{spliced_bytes}@{}->{target_offset}",
                    location.offset
                ));
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn havoc<R: Rand>(&self, child: &mut MappedInput, desc: &mut String, rand: &mut R) {
        let num_mutations = sample_geometric(rand, MEAN_MUTATION_COUNT);
        desc.push_str(&format!(",havoc:{num_mutations}"));

        let set_to_zero = rand.coinflip(0.1);

        for _ in 0..num_mutations {
            if child.map_order.is_empty() {
                break;
            }
            let offset = rand.below(child.map_order.len());
            let mutation_size = sample_geometric(rand, MEAN_MUTATION_SIZE);
            let end = usize::min(offset + mutation_size, child.map_order.len());

            for i in offset..end {
                let value = if set_to_zero { 0 } else { rand.next_byte() };
                if let Some(slot) = child.values.get_mut(&child.map_order[i]) {
                    *slot = value;
                }
            }
        }
    }
}

/// Copies every source entry under the splice point's shared subtree into
/// the child, re-keyed from the source prefix to the target prefix. Returns
/// the number of entries spliced; zero means the indices share no suffix and
/// the candidate must be rejected.
fn splice_subtree(
    child: &mut MappedInput,
    target_ei: &ExecutionIndex,
    source: &MappedInput,
    source_offset: usize,
) -> Result<usize, Error> {
    let source_ei = source.key_at_offset(source_offset)?.clone();
    let suffix_len = target_ei.common_suffix_len(&source_ei);
    if suffix_len == 0 {
        return Ok(0);
    }

    let source_prefix = source_ei.prefix_for_suffix(suffix_len).to_vec();
    let target_prefix = target_ei.prefix_for_suffix(suffix_len).to_vec();
    debug_assert_eq!(source_prefix.len(), target_prefix.len());

    let mut src_idx = source_offset;
    while src_idx < source.size() {
        let candidate_ei = source.key_at_offset(src_idx)?;
        if !candidate_ei.starts_with(&source_prefix) {
            // We are no more in the same sub-tree as the splice point
            break;
        }
        let suffix = &candidate_ei.elements()[source_prefix.len()..];
        let splice_ei = ExecutionIndex::rekeyed(&target_prefix, suffix);
        if let Some(value) = source.value_at_key(candidate_ei) {
            child.put(splice_ei, value);
        }
        src_idx += 1;
    }
    Ok(src_idx - source_offset)
}

/// Copies a contiguous span of bytes from the source into the child, under
/// the target's existing keys. Returns the number of bytes spliced.
fn splice_span<R: Rand>(
    child: &mut MappedInput,
    target: &MappedInput,
    target_offset: usize,
    source: &MappedInput,
    source_offset: usize,
    rand: &mut R,
) -> Result<usize, Error> {
    let splice_size = 1 + rand.below(MAX_SPLICE_SIZE);
    let src_size = source.size();
    let tgt_size = child.size();

    let mut spliced = 0;
    let mut src = source_offset;
    let mut tgt = target_offset;
    while spliced < splice_size && src < src_size && tgt < tgt_size {
        let value = source.value_at_offset(src)?;
        let key = target.key_at_offset(tgt)?.clone();
        child.put(key, value);
        spliced += 1;
        src += 1;
        tgt += 1;
    }
    Ok(spliced)
}
