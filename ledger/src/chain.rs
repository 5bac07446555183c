//! The append-only ledger chain and its pending-transaction buffer.
//!
//! Commit is atomic: a block becomes visible in [`LedgerChain::blocks`] only
//! after it passed every check and the block store acknowledged the write.
//! On any failure the chain is truncated back to its previous length and the
//! pending buffer is left as it was.

use {
    crate::{
        block::{Block, BlockCandidate, BlockHeader, ConsensusSignature},
        error::{LedgerError, RecoveryError},
        store::BlockStore,
        transaction::Transaction,
        validator::TxValidator,
    },
    log::*,
    ogp_merkle_tree::compute_root_of,
    ogp_snapshots::{Checkpoint, CheckpointStore},
    std::sync::Arc,
};

/// Everything consensus agreed on for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSeal {
    /// Header of the candidate the validators signed.
    pub header: BlockHeader,
    /// The certified batch, in proposal order.
    pub transactions: Vec<Transaction>,
    /// Commit signatures over `header.hash()`.
    pub signatures: Vec<ConsensusSignature>,
    /// Distinct valid signatures required.
    pub quorum: usize,
}

/// One line of [`LedgerChain::ledger_summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: u64,
    pub tx_count: usize,
    pub signers: Vec<String>,
    pub short_hash: String,
}

pub struct LedgerChain {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    validator: TxValidator,
    store: Arc<dyn BlockStore>,
}

impl LedgerChain {
    /// A fresh chain holding only the genesis block.
    pub fn new(store: Arc<dyn BlockStore>, validator: TxValidator) -> Self {
        Self {
            blocks: vec![Block::genesis()],
            pending: Vec::new(),
            validator,
            store,
        }
    }

    /// Rebuild a chain from the stored checkpoint and the block log.
    ///
    /// The checkpoint block seeds the chain and every later persisted block
    /// that links cleanly is appended. Fails instead of falling back to
    /// genesis when the checkpoint or its block cannot be found; the caller
    /// decides whether starting from genesis is acceptable.
    pub async fn recover_from_snapshot(
        store: Arc<dyn BlockStore>,
        checkpoints: &dyn CheckpointStore,
        validator: TxValidator,
    ) -> Result<Self, RecoveryError> {
        let Some(checkpoint) = checkpoints.load().await else {
            return Err(RecoveryError::NoCheckpoint);
        };

        let genesis = Block::genesis();
        let anchor = if checkpoint.last_hash == *genesis.hash() {
            genesis
        } else {
            store
                .fetch_block(&checkpoint.last_hash)
                .await?
                .ok_or(RecoveryError::MissingBlock(checkpoint.last_hash))?
        };
        if anchor.index() != checkpoint.height {
            return Err(RecoveryError::HeightMismatch {
                checkpoint: checkpoint.height,
                block: anchor.index(),
            });
        }
        if !anchor.verify_integrity() {
            return Err(RecoveryError::CorruptBlock(anchor.index()));
        }

        let mut blocks = vec![anchor];
        for block in store
            .list_blocks(checkpoint.height.saturating_add(1))
            .await?
        {
            let Some(head) = blocks.last() else {
                break;
            };
            if block.index() <= head.index() {
                continue;
            }
            if block.index() != head.index().saturating_add(1)
                || !block.validate_link(head)
                || !block.verify_integrity()
            {
                warn!(
                    "recovery stopped at block {}: does not extend block {}",
                    block.index(),
                    head.index()
                );
                break;
            }
            blocks.push(block);
        }

        info!(
            "recovered chain from checkpoint height={} to height={}",
            checkpoint.height,
            blocks.last().map_or(checkpoint.height, Block::index)
        );
        Ok(Self {
            blocks,
            pending: Vec::new(),
            validator,
            store,
        })
    }

    // -- Pending buffer --

    /// Admit a transaction into the pending buffer.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        self.validator.validate(&tx)?;
        self.pending.push(tx);
        Ok(())
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// The block a leader would propose from the current pending buffer.
    pub fn candidate(
        &self,
        view: u64,
        seq: u64,
        timestamp: u64,
    ) -> Result<Option<BlockCandidate>, LedgerError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let head = self.latest_block();
        let header = BlockHeader {
            index: head.index().saturating_add(1),
            timestamp,
            view,
            seq,
            previous_hash: *head.hash(),
            merkle_root: compute_root_of(&self.pending)?,
        };
        Ok(Some(BlockCandidate {
            header,
            transactions: self.pending.clone(),
        }))
    }

    /// Check a leader's candidate and put its batch at the front of the
    /// pending buffer.
    ///
    /// Local transactions the candidate does not carry stay pending behind
    /// the batch, in their original order.
    pub fn stage_proposal(&mut self, candidate: &BlockCandidate) -> Result<(), LedgerError> {
        let head = self.latest_block();
        let header = &candidate.header;
        if header.index != head.index().saturating_add(1) || header.previous_hash != *head.hash()
        {
            return Err(LedgerError::LinkError {
                index: header.index,
            });
        }
        let actual = candidate.computed_merkle_root()?;
        if actual != header.merkle_root {
            return Err(LedgerError::MerkleMismatch {
                expected: header.merkle_root,
                actual,
            });
        }
        for (index, tx) in candidate.transactions.iter().enumerate() {
            self.validator.validate(tx)?;
            if !tx.verify_signature() {
                return Err(LedgerError::InvalidTransactionSignature { index });
            }
        }

        let mut staged = candidate.transactions.clone();
        staged.extend(
            self.pending
                .drain(..)
                .filter(|tx| !candidate.transactions.contains(tx)),
        );
        let carried = staged.len().saturating_sub(candidate.transactions.len());
        if carried > 0 {
            debug!(
                "staging proposal {} keeps {carried} local transactions pending",
                header.index
            );
        }
        self.pending = staged;
        Ok(())
    }

    // -- Commit --

    /// Seal the certified batch into a block and persist it.
    ///
    /// Only the transactions the seal carries are removed from the pending
    /// buffer; anything submitted after the proposal stays pending. Returns
    /// `Ok(None)` without touching anything when there is nothing pending or
    /// the batch is empty.
    pub async fn commit_block(&mut self, seal: BlockSeal) -> Result<Option<Block>, LedgerError> {
        if self.pending.is_empty() || seal.transactions.is_empty() {
            debug!("commit skipped: nothing pending");
            return Ok(None);
        }

        let prior_len = self.blocks.len();
        let block = self.seal_batch(seal)?;

        self.blocks.push(block.clone());
        if let Err(e) = self.store.write_block(&block).await {
            self.blocks.truncate(prior_len);
            warn!("block #{} not persisted, rolled back: {e}", block.index());
            return Err(e.into());
        }
        self.pending
            .retain(|tx| !block.transactions().contains(tx));

        info!(
            "block #{} committed with {} validator signatures ({} txs, hash {})",
            block.index(),
            block.consensus_signatures().len(),
            block.transactions().len(),
            block.hash().short()
        );
        Ok(Some(block))
    }

    fn seal_batch(&self, seal: BlockSeal) -> Result<Block, LedgerError> {
        let BlockSeal {
            header,
            transactions,
            signatures,
            quorum,
        } = seal;
        let head = self.latest_block();
        let block = Block::new(
            header.index,
            &transactions,
            header.previous_hash,
            signatures,
            header.view,
            header.seq,
            header.timestamp,
        )?;

        if block.merkle_root() != &header.merkle_root {
            return Err(LedgerError::MerkleMismatch {
                expected: header.merkle_root,
                actual: *block.merkle_root(),
            });
        }
        if block.index() != head.index().saturating_add(1) || !block.validate_link(head) {
            return Err(LedgerError::LinkError {
                index: block.index(),
            });
        }
        if let Err(index) = block.verify_transaction_signatures() {
            return Err(LedgerError::InvalidTransactionSignature { index });
        }
        let valid = block.valid_signature_count();
        if valid < quorum {
            return Err(LedgerError::InsufficientSignatures { valid, quorum });
        }
        Ok(block)
    }

    // -- Queries --

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least its anchor block.
        &self.blocks[self.blocks.len().saturating_sub(1)]
    }

    /// Index of the head block.
    pub fn height(&self) -> u64 {
        self.latest_block().index()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Checkpoint describing the current head.
    pub fn checkpoint(&self) -> Checkpoint {
        let head = self.latest_block();
        Checkpoint {
            height: head.index(),
            last_hash: *head.hash(),
        }
    }

    /// Index of the first block whose Merkle root, hash or link is broken.
    pub fn first_invalid_index(&self) -> Option<u64> {
        let first = self.blocks.first()?;
        if !first.verify_integrity() {
            return Some(first.index());
        }
        self.blocks
            .windows(2)
            .find(|pair| !pair[1].verify_integrity() || !pair[1].validate_link(&pair[0]))
            .map(|pair| pair[1].index())
    }

    pub fn is_chain_valid(&self) -> bool {
        match self.first_invalid_index() {
            Some(index) => {
                error!("block {index} failed integrity or link verification");
                false
            }
            None => true,
        }
    }

    pub fn ledger_summary(&self) -> Vec<BlockSummary> {
        self.blocks
            .iter()
            .map(|block| BlockSummary {
                index: block.index(),
                tx_count: block.transactions().len(),
                signers: block
                    .consensus_signatures()
                    .iter()
                    .map(|sig| sig.validator_id.clone())
                    .collect(),
                short_hash: block.hash().short(),
            })
            .collect()
    }

    /// Swap in an arbitrary block at `position`, bypassing every check.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn replace_block(&mut self, position: usize, block: Block) {
        self.blocks[position] = block;
    }
}

impl std::fmt::Debug for LedgerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerChain")
            .field("height", &self.height())
            .field("pending", &self.pending.len())
            .field("validator", &self.validator)
            .finish()
    }
}
