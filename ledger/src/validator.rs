//! Admission rules for the pending-transaction buffer.
//!
//! Rules are checked in order and the first failing rule names the
//! rejection. The default set only checks shape; full signature
//! verification happens when a block is sealed.

use crate::{error::ValidationError, transaction::Transaction};

/// A single admission rule.
pub trait TxRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, tx: &Transaction) -> bool;
}

/// Adapts a closure into a named [`TxRule`].
pub struct FnRule<F> {
    name: String,
    check: F,
}

impl<F> FnRule<F>
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> TxRule for FnRule<F>
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, tx: &Transaction) -> bool {
        (self.check)(tx)
    }
}

/// `amount` must be non-negative.
pub struct AmountRule;

impl TxRule for AmountRule {
    fn name(&self) -> &str {
        "amount"
    }

    fn check(&self, tx: &Transaction) -> bool {
        tx.amount >= 0
    }
}

/// `from` and `to` must both be present.
pub struct PartiesRule;

impl TxRule for PartiesRule {
    fn name(&self) -> &str {
        "parties"
    }

    fn check(&self, tx: &Transaction) -> bool {
        !tx.from.trim().is_empty() && !tx.to.trim().is_empty()
    }
}

/// A signature must be attached.
pub struct SignaturePresentRule;

impl TxRule for SignaturePresentRule {
    fn name(&self) -> &str {
        "signature"
    }

    fn check(&self, tx: &Transaction) -> bool {
        tx.signature.is_some()
    }
}

/// Ordered rule set gating [`LedgerChain::add_transaction`](crate::LedgerChain::add_transaction).
pub struct TxValidator {
    rules: Vec<Box<dyn TxRule>>,
}

impl Default for TxValidator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(AmountRule),
                Box::new(PartiesRule),
                Box::new(SignaturePresentRule),
            ],
        }
    }
}

impl TxValidator {
    /// Validator with the default `amount`, `parties` and `signature` rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator with no rules; accepts everything.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule, checked after all existing rules.
    pub fn with_rule(mut self, rule: impl TxRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn validate(&self, tx: &Transaction) -> Result<(), ValidationError> {
        match self.rules.iter().find(|rule| !rule.check(tx)) {
            Some(rule) => Err(ValidationError {
                rule: rule.name().to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TxValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxValidator")
            .field("rules", &self.rule_names())
            .finish()
    }
}
