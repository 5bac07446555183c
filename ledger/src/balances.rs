//! Account balances derived from committed blocks.

use {
    crate::{
        block::Block,
        transaction::{Transaction, TxKind},
    },
    std::collections::BTreeMap,
};

/// Balances per account, replayed from the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    balances: BTreeMap<String, i64>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay every transaction in `blocks`, in order.
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let mut sheet = Self::new();
        for block in blocks {
            sheet.apply_block(block);
        }
        sheet
    }

    pub fn apply_block(&mut self, block: &Block) {
        for tx in block.transactions() {
            self.apply(tx);
        }
    }

    /// Mints credit `to`; transfers debit `from` and credit `to`.
    pub fn apply(&mut self, tx: &Transaction) {
        if tx.kind == TxKind::Transfer {
            let from = self.balances.entry(tx.from.clone()).or_default();
            *from = from.saturating_sub(tx.amount);
        }
        let to = self.balances.entry(tx.to.clone()).or_default();
        *to = to.saturating_add(tx.amount);
    }

    pub fn balance(&self, account: &str) -> i64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn accounts(&self) -> &BTreeMap<String, i64> {
        &self.balances
    }
}
