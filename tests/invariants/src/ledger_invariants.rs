//! Property-based tests for ledger chain invariants.
//!
//! Properties tested:
//! 1. Block hash and Merkle root are pure functions of their inputs.
//! 2. Every successful commit leaves the chain valid.
//! 3. Tampering with a block's previous hash or with one of its
//!    transactions is reported at that index.
//! 4. Repeated signatures from one validator never count toward quorum.
//! 5. Transactions submitted after a seal was cut survive its commit.

#[cfg(test)]
mod tests {
    use {
        ogp_crypto::{hash, Hash, Keypair},
        ogp_ledger::{
            Block, BlockSeal, ConsensusSignature, LedgerChain, LedgerError, MemoryBlockStore,
            Transaction, TxValidator,
        },
        ogp_merkle_tree::compute_root_of,
        proptest::prelude::*,
        std::sync::Arc,
    };

    // ── Helpers ──

    fn signer() -> Keypair {
        Keypair::from_seed(&[0x42; 32]).unwrap()
    }

    fn validators(n: usize) -> Vec<(String, Keypair)> {
        (0..n)
            .map(|i| {
                let mut seed = [0xCC; 32];
                seed[0] = u8::try_from(i).unwrap();
                (format!("validator-{i}"), Keypair::from_seed(&seed).unwrap())
            })
            .collect()
    }

    fn make_txs(amounts: &[i64], nonce_base: u64) -> Vec<Transaction> {
        let key = signer();
        amounts
            .iter()
            .zip(nonce_base..)
            .map(|(amount, nonce)| {
                Transaction::mint("treasury", "alice", *amount, nonce)
                    .signed(&key)
                    .unwrap()
            })
            .collect()
    }

    fn sign_header(digest: &Hash, signers: &[(String, Keypair)]) -> Vec<ConsensusSignature> {
        signers
            .iter()
            .map(|(id, key)| ConsensusSignature {
                validator_id: id.clone(),
                signature: key.sign_bytes(digest.as_ref()),
                public_key: key.public_key(),
            })
            .collect()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().build().unwrap()
    }

    /// Commit `batches` one block at a time with 3-of-4 signatures.
    async fn commit_batches(chain: &mut LedgerChain, batches: &[Vec<i64>]) -> Vec<Block> {
        let set = validators(4);
        let mut committed = Vec::new();
        for (seq, amounts) in (1u64..).zip(batches) {
            for tx in make_txs(amounts, seq.saturating_mul(1_000)) {
                chain.add_transaction(tx).unwrap();
            }
            let candidate = chain.candidate(0, seq, seq).unwrap().unwrap();
            let seal = BlockSeal {
                header: candidate.header,
                transactions: candidate.transactions.clone(),
                signatures: sign_header(&candidate.digest(), &set[..3]),
                quorum: 3,
            };
            committed.push(chain.commit_block(seal).await.unwrap().unwrap());
        }
        committed
    }

    fn amounts() -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::vec(1..=10_000i64, 1..8)
    }

    // ── Hashing ──

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn block_hash_and_merkle_root_are_deterministic(
            amounts in amounts(),
            index in 1..1_000u64,
            view in 0..10u64,
            seq in 1..1_000u64,
            timestamp in any::<u64>(),
        ) {
            let txs = make_txs(&amounts, 0);
            let previous = hash(&index.to_le_bytes());
            let a = Block::new(index, &txs, previous, vec![], view, seq, timestamp).unwrap();
            let b = Block::new(index, &txs, previous, vec![], view, seq, timestamp).unwrap();
            prop_assert_eq!(a.hash(), b.hash());
            prop_assert_eq!(a.merkle_root(), &compute_root_of(&txs).unwrap());
            prop_assert!(a.verify_integrity());
            // Recomputing twice changes nothing.
            prop_assert_eq!(a.header().hash(), *a.hash());
            prop_assert_eq!(a.header().hash(), a.header().hash());

            let other = Block::new(index, &txs, previous, vec![], view, seq, timestamp ^ 1).unwrap();
            prop_assert_ne!(a.hash(), other.hash());
        }
    }

    // ── Commit ──

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn commit_leaves_chain_valid(batches in proptest::collection::vec(amounts(), 1..6)) {
            let mut chain = LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new());
            let committed = runtime().block_on(commit_batches(&mut chain, &batches));

            prop_assert!(chain.is_chain_valid());
            prop_assert_eq!(chain.height(), u64::try_from(batches.len()).unwrap());
            prop_assert!(chain.pending().is_empty());
            for block in &committed {
                prop_assert!(block.verify_signatures(3));
            }
        }

        #[test]
        fn tampering_is_reported_at_its_index(
            batches in proptest::collection::vec(amounts(), 2..6),
            pick in any::<usize>(),
        ) {
            let mut chain = LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new());
            runtime().block_on(commit_batches(&mut chain, &batches));

            let position = pick.checked_rem(batches.len()).unwrap().saturating_add(1);
            let tampered = chain.blocks()[position].with_tampered_previous_hash(hash(b"forged"));
            prop_assert!(!tampered.validate_link(&chain.blocks()[position.saturating_sub(1)]));
            chain.replace_block(position, tampered);
            prop_assert!(!chain.is_chain_valid());
            prop_assert_eq!(chain.first_invalid_index(), Some(u64::try_from(position).unwrap()));
        }

        #[test]
        fn tampered_transaction_is_reported_at_its_index(
            batches in proptest::collection::vec(amounts(), 2..6),
            pick in any::<usize>(),
            forged_amount in 10_001..=1_000_000i64,
        ) {
            let mut chain = LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new());
            runtime().block_on(commit_batches(&mut chain, &batches));

            let position = pick.checked_rem(batches.len()).unwrap().saturating_add(1);
            let tx_index = pick.checked_rem(batches[position.saturating_sub(1)].len()).unwrap();
            let tampered = chain.blocks()[position].with_tampered_amount(tx_index, forged_amount);
            // Hash and links still check out; only the Merkle root exposes it.
            prop_assert!(tampered.verify_hash());
            prop_assert!(tampered.validate_link(&chain.blocks()[position.saturating_sub(1)]));
            chain.replace_block(position, tampered);
            prop_assert!(!chain.is_chain_valid());
            prop_assert_eq!(chain.first_invalid_index(), Some(u64::try_from(position).unwrap()));
        }

        #[test]
        fn late_submissions_survive_commit(batch in amounts(), late in amounts()) {
            let set = validators(4);
            let mut chain = LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new());
            for tx in make_txs(&batch, 0) {
                chain.add_transaction(tx).unwrap();
            }
            let candidate = chain.candidate(0, 1, 1).unwrap().unwrap();
            let seal = BlockSeal {
                header: candidate.header,
                transactions: candidate.transactions.clone(),
                signatures: sign_header(&candidate.digest(), &set[..3]),
                quorum: 3,
            };
            let late_txs = make_txs(&late, 1_000);
            for tx in late_txs.clone() {
                chain.add_transaction(tx).unwrap();
            }

            let block = runtime().block_on(chain.commit_block(seal)).unwrap().unwrap();
            prop_assert_eq!(block.transactions(), candidate.transactions.as_slice());
            prop_assert_eq!(chain.pending(), late_txs.as_slice());
            prop_assert!(chain.is_chain_valid());
        }

        #[test]
        fn duplicate_signatures_do_not_inflate_quorum(amounts in amounts(), copies in 2..10usize) {
            let set = validators(4);
            let mut chain = LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new());
            for tx in make_txs(&amounts, 0) {
                chain.add_transaction(tx).unwrap();
            }
            let candidate = chain.candidate(0, 1, 1).unwrap().unwrap();
            let one = sign_header(&candidate.digest(), &set[..1]);
            let signatures: Vec<_> = std::iter::repeat(one[0].clone()).take(copies).collect();

            let block = Block::new(
                1,
                &candidate.transactions,
                candidate.header.previous_hash,
                signatures.clone(),
                0,
                1,
                1,
            )
            .unwrap();
            prop_assert_eq!(block.valid_signature_count(), 1);

            let seal = BlockSeal {
                header: candidate.header,
                transactions: candidate.transactions.clone(),
                signatures,
                quorum: 3,
            };
            let result = runtime().block_on(chain.commit_block(seal));
            prop_assert!(
                matches!(result, Err(LedgerError::InsufficientSignatures { valid: 1, quorum: 3 })),
                "unexpected result {:?}", result
            );
            prop_assert_eq!(chain.height(), 0);
            prop_assert_eq!(chain.pending().len(), amounts.len());
        }
    }
}
