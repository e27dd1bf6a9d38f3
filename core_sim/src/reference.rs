use std::fmt;

use serde::Serialize;

use crate::{addr::DecomposedAddr, cache::BlockEntry};

/// Whether the top-level cache served a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Hit => write!(f, "HIT"),
            CacheStatus::Miss => write!(f, "miss"),
        }
    }
}

/// One decomposed address on its way through a simulation pass. The status
/// is written exactly once, when the pass reaches the reference.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    #[serde(flatten)]
    pub addr: DecomposedAddr,
    pub cache_status: Option<CacheStatus>,
}

impl Reference {
    pub fn new(addr: DecomposedAddr) -> Self {
        Self {
            addr,
            cache_status: None,
        }
    }

    /// The consecutive word addresses spanning this reference's block.
    pub fn block_span(&self, words_per_block: usize) -> Vec<u64> {
        let addr = self.addr.word_addr.inner();
        let base = addr - addr % words_per_block as u64;
        (base..base + words_per_block as u64).collect()
    }

    /// Materializes the block entry a miss on this reference brings in.
    pub fn cache_entry(&self, words_per_block: usize) -> BlockEntry {
        BlockEntry {
            tag: self.addr.tag,
            index: self.addr.index,
            data: self.block_span(words_per_block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{FieldWidths, WordAddr};

    #[test]
    fn block_span_covers_the_enclosing_block() {
        let widths = FieldWidths {
            addr: 8,
            tag: 5,
            index: 1,
            offset: 2,
        };
        let r = Reference::new(DecomposedAddr::decompose(WordAddr::new(21), widths).unwrap());
        assert_eq!(r.block_span(4), vec![20, 21, 22, 23]);
        let entry = r.cache_entry(4);
        assert_eq!(entry.tag, r.addr.tag);
        assert_eq!(entry.index, r.addr.index);
    }
}
