//! Text Corpus
//!
//! Practice lines for solo runs and races. Lines keep insertion order so
//! they can be addressed by index.

use parking_lot::RwLock;
use rand::seq::SliceRandom;

/// Source of practice text.
pub trait TextCorpus: Send + Sync {
    /// Line at `index`, if any.
    fn line(&self, index: usize) -> Option<String>;

    /// A uniformly chosen line, or `None` when the corpus is empty.
    fn random_line(&self) -> Option<String>;

    /// Number of lines.
    fn len(&self) -> usize;

    /// True when there is nothing to type.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process corpus.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    lines: RwLock<Vec<String>>,
}

impl MemoryCorpus {
    /// Create a corpus from the non-blank entries of `lines`.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines
            .into_iter()
            .map(Into::into)
            .map(|l: String| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Self {
            lines: RwLock::new(lines),
        }
    }

    /// Parse a corpus file: one practice line per non-empty line.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines())
    }

    /// Append a line. Returns its index, or `None` if the line is blank.
    pub fn add_line(&self, line: &str) -> Option<usize> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut lines = self.lines.write();
        lines.push(line.to_string());
        Some(lines.len() - 1)
    }

    /// Remove the line at `index`, shifting later lines down.
    pub fn remove_line(&self, index: usize) -> Option<String> {
        let mut lines = self.lines.write();
        if index < lines.len() {
            Some(lines.remove(index))
        } else {
            None
        }
    }

    /// Copy of every line.
    pub fn lines(&self) -> Vec<String> {
        self.lines.read().clone()
    }
}

impl TextCorpus for MemoryCorpus {
    fn line(&self, index: usize) -> Option<String> {
        self.lines.read().get(index).cloned()
    }

    fn random_line(&self) -> Option<String> {
        self.lines.read().choose(&mut rand::thread_rng()).cloned()
    }

    fn len(&self) -> usize {
        self.lines.read().len()
    }
}
