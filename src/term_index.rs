use std::collections::HashMap;

use crate::glossary::{Glossary, GlossaryEntry};

/// TF-IDF style relevance of glossary terms against the chapter corpus.
///
/// Built from a snapshot of the corpus and the glossary term list. It goes
/// stale as the glossary grows and is rebuilt by the synchronizer; readers
/// hold an `Arc` to whichever snapshot was current when they started.
#[derive(Debug, Clone, Default)]
pub struct TermRelevanceIndex {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
    fitted: bool,
}

impl TermRelevanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fitted<S: AsRef<str>>(documents: &[S], terms: &[String]) -> Self {
        let mut index = Self::new();
        index.fit(documents, terms);
        index
    }

    /// Counts, per term, how many documents contain it at least once.
    pub fn fit<S: AsRef<str>>(&mut self, documents: &[S], terms: &[String]) {
        self.doc_count = documents.len();
        self.doc_freq = terms
            .iter()
            .filter(|t| !t.is_empty())
            .map(|term| {
                let df = documents
                    .iter()
                    .filter(|doc| doc.as_ref().contains(term.as_str()))
                    .count();
                (term.clone(), df)
            })
            .collect();
        self.fitted = true;
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn term_count(&self) -> usize {
        self.doc_freq.len()
    }

    /// Scores each fitted term that occurs in `chunk`. Terms that do not occur
    /// get no entry at all.
    pub fn score_chunk(&self, chunk: &str) -> HashMap<String, f64> {
        let n = self.doc_count as f64;
        self.doc_freq
            .iter()
            .filter_map(|(term, &df)| {
                let occurrences = chunk.matches(term.as_str()).count();
                if occurrences == 0 {
                    return None;
                }
                let idf = ((n + 1.0) / (df as f64 + 1.0)).ln();
                Some((term.clone(), occurrences as f64 * idf + 1.0))
            })
            .collect()
    }
}

/// Picks at most `top_k` glossary entries relevant to `chunk`.
///
/// With a fitted index, entries are ranked by score. Live glossary terms the
/// index has not seen yet, and every term when the index is unfitted, fall
/// back to a literal-occurrence filter ordered by category priority.
pub fn select_relevant<'a>(
    glossary: &'a Glossary,
    index: &TermRelevanceIndex,
    chunk: &str,
    top_k: usize,
) -> Vec<&'a GlossaryEntry> {
    let mut selected = Vec::new();

    if index.is_fitted() {
        let mut scored = index
            .score_chunk(chunk)
            .into_iter()
            .filter_map(|(term, score)| glossary.lookup(&term).map(|e| (e, score)))
            .collect::<Vec<_>>();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.category.priority().cmp(&b.category.priority()))
                .then_with(|| a.source_term.cmp(&b.source_term))
        });
        selected.extend(scored.into_iter().map(|(e, _)| e).take(top_k));
    }

    if selected.len() < top_k {
        let mut literal = glossary
            .entries()
            .iter()
            .filter(|e| !e.source_term.is_empty() && chunk.contains(e.source_term.as_str()))
            .filter(|e| !index.is_fitted() || !index.doc_freq.contains_key(&e.source_term))
            .collect::<Vec<_>>();
        literal.sort_by_key(|e| e.category.priority());
        let room = top_k - selected.len();
        selected.extend(literal.into_iter().take(room));
    }

    selected
}
