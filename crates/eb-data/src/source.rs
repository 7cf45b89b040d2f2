use std::collections::BTreeMap;

use eb_types::hash::{fnv1a, hex};
use eb_types::{Bar, Symbol};

use crate::split::{SplitName, SplitPair};

/// Replays the active split one bar per symbol per tick.
///
/// Symbols advance in lexicographic order so multi-symbol runs have a
/// stable processing order. `peek` exposes the symbol's next bar for the
/// coordinator's end-of-day lookahead.
#[derive(Debug, Clone)]
pub struct BarSource {
    splits: BTreeMap<Symbol, SplitPair>,
    cursors: BTreeMap<Symbol, usize>,
    active: SplitName,
}

impl BarSource {
    pub fn new(splits: BTreeMap<Symbol, SplitPair>) -> Self {
        let cursors = splits.keys().map(|s| (s.clone(), 0)).collect();
        Self {
            splits,
            cursors,
            active: SplitName::Train,
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.splits.keys()
    }

    pub fn active_split(&self) -> SplitName {
        self.active
    }

    /// Selects which split `next_tick` replays and rewinds all cursors.
    pub fn activate(&mut self, split: SplitName) {
        self.active = split;
        self.reset();
    }

    /// Rewinds the active split to its first bar.
    pub fn reset(&mut self) {
        for cursor in self.cursors.values_mut() {
            *cursor = 0;
        }
    }

    /// Next bar for each symbol that still has one, in symbol order.
    /// Empty when every symbol is exhausted.
    pub fn next_tick(&mut self) -> Vec<Bar> {
        let mut bars = Vec::new();
        for (symbol, pair) in &self.splits {
            let cursor = self.cursors.entry(symbol.clone()).or_insert(0);
            if let Some(bar) = pair.get(self.active).get(*cursor) {
                bars.push(bar.clone());
                *cursor += 1;
            }
        }
        bars
    }

    /// The bar `next_tick` would yield next for this symbol, without
    /// advancing.
    pub fn peek(&self, symbol: &Symbol) -> Option<&Bar> {
        let pair = self.splits.get(symbol)?;
        let cursor = *self.cursors.get(symbol)?;
        pair.get(self.active).get(cursor)
    }

    /// Remaining bar count across all symbols in the active split.
    pub fn remaining(&self) -> usize {
        self.splits
            .iter()
            .map(|(symbol, pair)| {
                let cursor = self.cursors.get(symbol).copied().unwrap_or(0);
                pair.get(self.active).len().saturating_sub(cursor)
            })
            .sum()
    }

    /// Aggregate fingerprint of one split across all symbols.
    pub fn fingerprint(&self, split: SplitName) -> String {
        let parts: Vec<String> = self
            .splits
            .values()
            .map(|pair| pair.get(split).fingerprint())
            .collect();
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        hex(fnv1a(&refs))
    }
}
