//! The linear input representation: an ordered byte vector plus a request
//! cursor.

use std::{collections::VecDeque, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    inputs::{GenerationPolicy, MEAN_MUTATION_COUNT, MEAN_MUTATION_SIZE},
    rands::{sample_geometric, Rand},
    Error,
};

/// A test input represented as a list of byte values ordered by their
/// request index.
///
/// Reads must arrive strictly in order; the `i`-th read returns the stored
/// byte if one exists, and otherwise extends the vector with a freshly drawn
/// one (or EOF, depending on the [`GenerationPolicy`]).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LinearInput {
    /// Byte values (0-255) ordered by their request index
    values: Vec<u8>,
    /// The number of bytes requested so far
    requested: usize,
    /// Bytes still to be served from a seed file, drained before any fresh
    /// generation happens
    pending_seed: VecDeque<u8>,
}

impl LinearInput {
    /// Creates an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an input backed by the contents of a seed file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read.
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            Error::os_error(err, format!("error reading seed file {}", path.display()))
        })?;
        Ok(Self {
            values: Vec::new(),
            requested: 0,
            pending_seed: bytes.into(),
        })
    }

    /// The number of bytes currently stored.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// The stored bytes, in request order.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.values
    }

    /// Serves the `key`-th consecutive byte request, generating a fresh byte
    /// if the input is exhausted. Returns `None` for EOF.
    ///
    /// # Errors
    ///
    /// If `key` is not the next unserved request index; linear inputs only
    /// support strictly sequential reads.
    pub fn get_or_generate_fresh<R: Rand>(
        &mut self,
        key: usize,
        rand: &mut R,
        policy: GenerationPolicy,
    ) -> Result<Option<u8>, Error> {
        if key != self.requested {
            return Err(Error::illegal_state(format!(
                "bytes from linear input out of order: size = {}, key = {key}",
                self.values.len()
            )));
        }

        // Don't generate over the limit
        if self.requested >= policy.max_input_size {
            return Ok(None);
        }

        if key < self.values.len() {
            self.requested += 1;
            return Ok(Some(self.values[key]));
        }

        // Seed bytes go first; only once they run out does the regular
        // fresh-byte path kick in
        if let Some(byte) = self.pending_seed.pop_front() {
            self.values.push(byte);
            self.requested += 1;
            return Ok(Some(byte));
        }

        if policy.generate_eof_when_out {
            return Ok(None);
        }

        let byte = rand.next_byte();
        self.values.push(byte);
        self.requested += 1;
        Ok(Some(byte))
    }

    /// Truncates the byte list to what was actually requested in the last
    /// run and rewinds the cursor so the trimmed input replays verbatim.
    pub fn gc(&mut self) {
        self.values.truncate(self.requested);
        self.values.shrink_to_fit();
        self.pending_seed = VecDeque::new();
        self.requested = 0;
    }

    /// Produces a mutated copy of this input by stacking havoc rounds.
    /// Returns the child and a provenance fragment for its description.
    pub fn fuzz<R: Rand>(&self, rand: &mut R) -> (LinearInput, String) {
        let mut child = LinearInput {
            values: self.values.clone(),
            requested: 0,
            pending_seed: VecDeque::new(),
        };

        let num_mutations = sample_geometric(rand, MEAN_MUTATION_COUNT);
        let desc = format!(",havoc:{num_mutations}");

        // one out of 10 times, zero the window instead of randomizing it
        let set_to_zero = rand.coinflip(0.1);

        for _ in 0..num_mutations {
            if child.values.is_empty() {
                break;
            }
            let offset = rand.below(child.values.len());
            let mutation_size = sample_geometric(rand, MEAN_MUTATION_SIZE);

            for i in offset..offset + mutation_size {
                if i >= child.values.len() {
                    break;
                }
                child.values[i] = if set_to_zero { 0 } else { rand.next_byte() };
            }
        }

        (child, desc)
    }
}

#[cfg(test)]
mod tests {
    use super::LinearInput;
    use crate::{
        inputs::GenerationPolicy,
        rands::{Rand, StdRand},
        Error,
    };

    const POLICY: GenerationPolicy = GenerationPolicy {
        max_input_size: 10240,
        generate_eof_when_out: false,
    };

    #[test]
    fn gc_roundtrip_preserves_requested_bytes() {
        let mut rand = StdRand::with_seed(0);
        let mut input = LinearInput::new();
        let n = 16;
        let mut original = Vec::new();
        for i in 0..n {
            let byte = input
                .get_or_generate_fresh(i, &mut rand, POLICY)
                .unwrap()
                .unwrap();
            original.push(byte);
        }
        input.gc();
        assert_eq!(input.size(), n);

        for (i, byte) in original.iter().enumerate() {
            let replayed = input.get_or_generate_fresh(i, &mut rand, POLICY).unwrap();
            assert_eq!(replayed, Some(*byte));
        }
    }

    #[test]
    fn gc_drops_unrequested_tail() {
        let mut rand = StdRand::with_seed(0);
        let mut input = LinearInput::new();
        for i in 0..8 {
            input.get_or_generate_fresh(i, &mut rand, POLICY).unwrap();
        }
        input.gc();

        // Re-run reads only 3 bytes this time
        for i in 0..3 {
            input.get_or_generate_fresh(i, &mut rand, POLICY).unwrap();
        }
        input.gc();
        assert_eq!(input.size(), 3);
    }

    #[test]
    fn out_of_order_read_is_an_invariant_error() {
        let mut rand = StdRand::with_seed(0);
        let mut input = LinearInput::new();
        input.get_or_generate_fresh(0, &mut rand, POLICY).unwrap();
        let err = input.get_or_generate_fresh(5, &mut rand, POLICY).unwrap_err();
        assert!(matches!(err, Error::IllegalState(..)));
    }

    #[test]
    fn eof_when_out_returns_none_without_growing() {
        let mut rand = StdRand::with_seed(0);
        let policy = GenerationPolicy {
            max_input_size: 10240,
            generate_eof_when_out: true,
        };
        let mut input = LinearInput::new();
        assert_eq!(input.get_or_generate_fresh(0, &mut rand, policy).unwrap(), None);
        assert_eq!(input.size(), 0);
    }

    #[test]
    fn max_input_size_caps_generation() {
        let mut rand = StdRand::with_seed(0);
        let policy = GenerationPolicy {
            max_input_size: 4,
            generate_eof_when_out: false,
        };
        let mut input = LinearInput::new();
        for i in 0..4 {
            assert!(input.get_or_generate_fresh(i, &mut rand, policy).unwrap().is_some());
        }
        assert_eq!(input.get_or_generate_fresh(4, &mut rand, policy).unwrap(), None);
    }

    #[test]
    fn seed_bytes_come_first() {
        let dir = std::env::temp_dir().join(format!("seedling_seed_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed_a");
        std::fs::write(&path, [9, 8, 7]).unwrap();

        let mut rand = StdRand::with_seed(0);
        let mut input = LinearInput::from_seed_file(&path).unwrap();
        for (i, expected) in [9_u8, 8, 7].into_iter().enumerate() {
            assert_eq!(
                input.get_or_generate_fresh(i, &mut rand, POLICY).unwrap(),
                Some(expected)
            );
        }
        // Past the file: falls through to fresh random bytes
        assert!(input.get_or_generate_fresh(3, &mut rand, POLICY).unwrap().is_some());
        assert_eq!(input.size(), 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fuzz_keeps_length_and_mutates_in_place() {
        let mut rand = StdRand::with_seed(5);
        let mut input = LinearInput::new();
        for i in 0..32 {
            input.get_or_generate_fresh(i, &mut rand, POLICY).unwrap();
        }
        input.gc();

        let (child, desc) = input.fuzz(&mut rand);
        assert_eq!(child.size(), input.size());
        assert!(desc.starts_with(",havoc:"));
    }
}
