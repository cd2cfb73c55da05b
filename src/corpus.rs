//! The saved-inputs corpus: testcase metadata and the edge-responsibility
//! relation.
//!
//! Every covered edge is owned by exactly one saved input; an input owning
//! at least one edge is *favored* and gets a larger child budget. The
//! relation is kept on both sides (per-testcase responsibility set, global
//! edge-to-input map) and the two are updated together in
//! [`Corpus::assign_responsibility`].

use hashbrown::{HashMap, HashSet};

use crate::{
    coverage::Coverage,
    inputs::{Input, InputRepr, MappedInput},
    Error,
};

/// A saved entry in the corpus: the input plus its bookkeeping data.
#[derive(Debug)]
pub struct Testcase {
    input: Input,
    /// Stable numeric id, also used for the on-disk filename
    id: usize,
    /// On-disk filename within the corpus directory
    filename: String,
    /// Snapshot of the run coverage taken when this input was saved
    coverage: Coverage,
    /// Cached non-zero count of `coverage`
    non_zero_coverage: usize,
    /// Number of saved children bred from this input
    offspring: usize,
    /// The coverage keys this input is currently responsible for
    responsibilities: HashSet<i32>,
}

impl Testcase {
    /// Creates a testcase for a just-saved input.
    #[must_use]
    pub fn new(
        input: Input,
        id: usize,
        filename: String,
        coverage: Coverage,
        non_zero_coverage: usize,
    ) -> Self {
        Self {
            input,
            id,
            filename,
            coverage,
            non_zero_coverage,
            offspring: 0,
            responsibilities: HashSet::new(),
        }
    }

    /// The input itself.
    #[must_use]
    pub fn input(&self) -> &Input {
        &self.input
    }

    /// The stable id of this entry.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The on-disk filename of this entry.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The coverage snapshot taken at save time.
    #[must_use]
    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// The number of edges this input covered when saved.
    #[must_use]
    pub fn non_zero_coverage(&self) -> usize {
        self.non_zero_coverage
    }

    /// The number of saved children bred from this input.
    #[must_use]
    pub fn offspring(&self) -> usize {
        self.offspring
    }

    pub(crate) fn increment_offspring(&mut self) {
        self.offspring += 1;
    }

    /// The set of edges this input owns.
    #[must_use]
    pub fn responsibilities(&self) -> &HashSet<i32> {
        &self.responsibilities
    }

    /// An input is favored iff it is responsible for at least one edge.
    /// Favored inputs receive a multiplied child budget.
    #[must_use]
    pub fn is_favored(&self) -> bool {
        !self.responsibilities.is_empty()
    }
}

/// A position inside a saved mapped input, used as a splicing source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InputLocation {
    /// Corpus index of the source input
    pub input: usize,
    /// Byte offset within the source input
    pub offset: usize,
}

/// The ordered list of saved inputs, plus the edge-to-owner map.
///
/// Entries are appended and never removed; their position doubles as the
/// corpus index.
#[derive(Debug, Default)]
pub struct Corpus {
    entries: Vec<Testcase>,
    responsible: HashMap<i32, usize>,
}

impl Corpus {
    /// Creates an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of saved inputs.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// `true` while nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetches an entry by corpus index.
    ///
    /// # Errors
    ///
    /// If the index is out of range.
    pub fn get(&self, idx: usize) -> Result<&Testcase, Error> {
        self.entries
            .get(idx)
            .ok_or_else(|| Error::key_not_found(format!("corpus entry {idx}")))
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Result<&mut Testcase, Error> {
        self.entries
            .get_mut(idx)
            .ok_or_else(|| Error::key_not_found(format!("corpus entry {idx}")))
    }

    /// Iterates over all saved entries in save order.
    pub fn entries(&self) -> impl Iterator<Item = &Testcase> {
        self.entries.iter()
    }

    /// Appends a new entry, returning its corpus index.
    pub fn add(&mut self, testcase: Testcase) -> usize {
        self.entries.push(testcase);
        self.entries.len() - 1
    }

    /// The mapped representation of the entry at `idx`, if it has one.
    #[must_use]
    pub fn mapped(&self, idx: usize) -> Option<&MappedInput> {
        match &self.entries.get(idx)?.input.repr {
            InputRepr::Mapped(mapped) => Some(mapped),
            InputRepr::Linear(_) => None,
        }
    }

    /// The corpus index of the input currently owning `edge`.
    #[must_use]
    pub fn responsible_for(&self, edge: i32) -> Option<usize> {
        self.responsible.get(&edge).copied()
    }

    /// Makes the entry at `idx` responsible for the given edges, revoking
    /// each edge from its previous owner. Both sides of the relation are
    /// updated here and nowhere else.
    ///
    /// # Errors
    ///
    /// If `idx` or a previous owner index is stale.
    pub fn assign_responsibility(
        &mut self,
        idx: usize,
        responsibilities: HashSet<i32>,
    ) -> Result<(), Error> {
        for &edge in &responsibilities {
            if let Some(previous) = self.responsible.insert(edge, idx) {
                if previous != idx {
                    self.entries
                        .get_mut(previous)
                        .ok_or_else(|| {
                            Error::key_not_found(format!("previous responsible input {previous}"))
                        })?
                        .responsibilities
                        .remove(&edge);
                }
            }
        }
        self.get_mut(idx)?.responsibilities = responsibilities;
        Ok(())
    }

    /// The total number of owned edges across all entries.
    #[must_use]
    pub fn sum_responsibilities(&self) -> usize {
        self.entries.iter().map(|tc| tc.responsibilities.len()).sum()
    }

    /// The number of favored entries.
    #[must_use]
    pub fn favored_count(&self) -> usize {
        self.entries.iter().filter(|tc| tc.is_favored()).count()
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use super::{Corpus, Testcase};
    use crate::{coverage::Coverage, inputs::Input};

    fn testcase(id: usize) -> Testcase {
        Testcase::new(
            Input::fresh_linear(),
            id,
            format!("id_{id:06}"),
            Coverage::new(),
            0,
        )
    }

    fn edges(list: &[i32]) -> HashSet<i32> {
        list.iter().copied().collect()
    }

    #[test]
    fn responsibility_moves_to_the_new_owner() {
        let mut corpus = Corpus::new();
        let a = corpus.add(testcase(0));
        let b = corpus.add(testcase(1));

        corpus.assign_responsibility(a, edges(&[1, 2])).unwrap();
        assert!(corpus.get(a).unwrap().is_favored());
        assert_eq!(corpus.responsible_for(1), Some(a));

        corpus.assign_responsibility(b, edges(&[2, 3])).unwrap();
        assert_eq!(corpus.responsible_for(1), Some(a));
        assert_eq!(corpus.responsible_for(2), Some(b));
        assert_eq!(corpus.responsible_for(3), Some(b));
        assert_eq!(corpus.get(a).unwrap().responsibilities(), &edges(&[1]));
    }

    #[test]
    fn every_edge_has_one_owner() {
        let mut corpus = Corpus::new();
        let a = corpus.add(testcase(0));
        let b = corpus.add(testcase(1));
        corpus.assign_responsibility(a, edges(&[1, 2, 3])).unwrap();
        corpus.assign_responsibility(b, edges(&[2])).unwrap();

        assert_eq!(corpus.sum_responsibilities(), 3);
        for edge in [1, 2, 3] {
            assert!(corpus.responsible_for(edge).is_some());
        }
    }

    #[test]
    fn empty_responsibilities_leave_an_unfavored_entry() {
        let mut corpus = Corpus::new();
        let a = corpus.add(testcase(0));
        corpus.assign_responsibility(a, HashSet::new()).unwrap();
        assert!(!corpus.get(a).unwrap().is_favored());
        assert_eq!(corpus.favored_count(), 0);
    }
}
