//! Authority-side account state and the settlement store.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::committee::Committee;
use crate::proto::AccountSnapshot;
use crate::timestamp::Timestamp;
use crate::types::{ConfirmationOrder, SignedTransferOrder, TokenBalance, TransactionStatus};

/// Offchain state an authority tracks per account.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub address: String,
    /// token_address -> balance
    pub balances: HashMap<String, TokenBalance>,
    /// Next sequence number this account may spend at.
    pub sequence_number: u64,
    pub last_update: Timestamp,
    /// The transfer we already voted for at the current sequence, if any.
    pub pending_confirmation: Option<SignedTransferOrder>,
    /// Confirmed certificates by order id, for idempotent re-application.
    pub confirmed_transfers: HashMap<String, ConfirmationOrder>,
}

impl AccountState {
    pub fn new(address: impl Into<String>, now: Timestamp) -> Self {
        AccountState {
            address: address.into(),
            balances: HashMap::new(),
            sequence_number: 1,
            last_update: now,
            pending_confirmation: None,
            confirmed_transfers: HashMap::new(),
        }
    }

    pub fn spendable(&self, token_address: &str) -> f64 {
        self.balances
            .get(token_address)
            .map(|balance| balance.meshpay_balance)
            .unwrap_or(0.0)
    }

    fn credit(&mut self, token_address: &str, amount: f64) {
        let balance = self
            .balances
            .entry(token_address.to_string())
            .or_insert_with(|| TokenBalance::new(token_address, token_address, 0.0));
        balance.meshpay_balance += amount;
        balance.total_balance += amount;
    }

    fn debit(&mut self, token_address: &str, amount: f64) {
        self.credit(token_address, -amount);
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            address: self.address.clone(),
            sequence_number: self.sequence_number,
            balances: self
                .balances
                .iter()
                .map(|(token, balance)| (token.clone(), balance.meshpay_balance))
                .collect(),
        }
    }
}

/// Why a confirmation certificate was not applied.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SettlementError {
    #[error("certificate carries {got} signatures, quorum is {required}")]
    BelowQuorum { got: usize, required: usize },
    #[error("certificate status {0} is not confirmable")]
    NotConfirmed(TransactionStatus),
}

/// All account state of one authority behind a single lock.
///
/// Acceptance decisions for a given `(sender, sequence_number)` serialize
/// on this lock; critical sections are O(1) map work with no I/O.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: Mutex<HashMap<String, AccountState>>,
}

fn recover<'a, T>(guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with an opening balance, e.g. from node config.
    pub fn fund(&self, address: &str, token: &TokenBalance, now: Timestamp) {
        let mut accounts = recover(self.accounts.lock());
        let account = accounts
            .entry(address.to_string())
            .or_insert_with(|| AccountState::new(address, now));
        account
            .balances
            .insert(token.token_address.clone(), token.clone());
        account.last_update = now;
    }

    pub fn get(&self, address: &str) -> Option<AccountState> {
        recover(self.accounts.lock()).get(address).cloned()
    }

    /// Run `f` against the (possibly freshly created) account under the
    /// store lock.
    pub fn with_account<R>(
        &self,
        address: &str,
        now: Timestamp,
        f: impl FnOnce(&mut AccountState) -> R,
    ) -> R {
        let mut accounts = recover(self.accounts.lock());
        let account = accounts
            .entry(address.to_string())
            .or_insert_with(|| AccountState::new(address, now));
        f(account)
    }

    pub fn snapshots(&self, addresses: &[String]) -> Vec<AccountSnapshot> {
        let accounts = recover(self.accounts.lock());
        if addresses.is_empty() {
            accounts.values().map(AccountState::snapshot).collect()
        } else {
            addresses
                .iter()
                .filter_map(|address| accounts.get(address))
                .map(AccountState::snapshot)
                .collect()
        }
    }

    /// Apply a quorum certificate: debit the sender, credit the recipient,
    /// advance the sender's sequence, and clear the pending vote.
    ///
    /// Re-applying a certificate already in `confirmed_transfers` is a
    /// no-op, so late or duplicated relays cannot double-settle.
    pub fn apply_confirmation(
        &self,
        confirmation: &ConfirmationOrder,
        committee: &Committee,
        now: Timestamp,
    ) -> Result<bool, SettlementError> {
        if confirmation.status != TransactionStatus::Confirmed
            && confirmation.status != TransactionStatus::Finalized
        {
            return Err(SettlementError::NotConfirmed(confirmation.status));
        }
        let required = committee.quorum_threshold();
        let got = confirmation.authority_signatures.len();
        if got < required {
            return Err(SettlementError::BelowQuorum { got, required });
        }

        let order = &confirmation.transfer_order;
        let order_key = order.order_id.to_string();
        let mut accounts = recover(self.accounts.lock());

        let sender = accounts
            .entry(order.sender.clone())
            .or_insert_with(|| AccountState::new(&order.sender, now));
        if sender.confirmed_transfers.contains_key(&order_key) {
            return Ok(false);
        }
        sender.debit(&order.token_address, order.amount as f64);
        sender.sequence_number = sender.sequence_number.max(order.sequence_number + 1);
        if let Some(pending) = &sender.pending_confirmation {
            if pending.order_id == order.order_id {
                sender.pending_confirmation = None;
            }
        }
        sender
            .confirmed_transfers
            .insert(order_key, confirmation.clone());
        sender.last_update = now;

        let recipient = accounts
            .entry(order.recipient.clone())
            .or_insert_with(|| AccountState::new(&order.recipient, now));
        recipient.credit(&order.token_address, order.amount as f64);
        recipient.last_update = now;

        Ok(true)
    }

    /// Record a vote: remember which order we signed at this sequence.
    pub fn record_pending(&self, signed: SignedTransferOrder, now: Timestamp) {
        let sender = signed.transfer_order.sender.clone();
        self.with_account(&sender, now, |account| {
            account.pending_confirmation = Some(signed);
            account.last_update = now;
        });
    }

    /// Operator-facing dump of balances, one JSON object per account.
    pub fn describe(&self) -> serde_json::Value {
        let accounts = recover(self.accounts.lock());
        json!(
            accounts
                .values()
                .map(|account| account.snapshot())
                .collect::<Vec<_>>()
        )
    }
}

/// Convenience used by the authority to look up one pending order id.
pub fn pending_order_id(account: &AccountState) -> Option<Uuid> {
    account
        .pending_confirmation
        .as_ref()
        .map(|signed| signed.order_id)
}
