//! Account events and the balance read model that follows them.
//!
//! Amounts are integer minor units (cents). Every event carries the balance
//! after it was applied, so the read model only ever stores the latest one.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::events::{EntityId, Event, EventBase, EventTypeRegistry};
use crate::handler::EventHandler;

/// Funds credited to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountAddEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub account_id: EntityId,
    pub amount: i64,
    pub balance: i64,
}

/// Funds moved from an account to another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountTransferEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub account_id: EntityId,
    pub to_account_id: EntityId,
    pub amount: i64,
    pub balance: i64,
}

/// Any account event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountEvent {
    AmountTransfer(AmountTransferEvent),
    AmountAdd(AmountAddEvent),
}

impl AccountEvent {
    pub fn account_id(&self) -> &EntityId {
        match self {
            AccountEvent::AmountAdd(e) => &e.account_id,
            AccountEvent::AmountTransfer(e) => &e.account_id,
        }
    }

    /// Balance after this event.
    pub fn balance(&self) -> i64 {
        match self {
            AccountEvent::AmountAdd(e) => e.balance,
            AccountEvent::AmountTransfer(e) => e.balance,
        }
    }

    fn base(&self) -> &EventBase {
        match self {
            AccountEvent::AmountAdd(e) => &e.base,
            AccountEvent::AmountTransfer(e) => &e.base,
        }
    }
}

impl Event for AccountEvent {
    fn version(&self) -> u64 {
        self.base().version
    }

    fn timestamp(&self) -> u64 {
        self.base().timestamp
    }

    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AmountAdd(_) => "AmountAddEvent",
            AccountEvent::AmountTransfer(_) => "AmountTransferEvent",
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        Some(self.account_id())
    }
}

impl From<AmountAddEvent> for AccountEvent {
    fn from(event: AmountAddEvent) -> Self {
        AccountEvent::AmountAdd(event)
    }
}

impl From<AmountTransferEvent> for AccountEvent {
    fn from(event: AmountTransferEvent) -> Self {
        AccountEvent::AmountTransfer(event)
    }
}

/// Type registry for account envelopes.
pub fn account_event_types() -> EventTypeRegistry<AccountEvent> {
    EventTypeRegistry::new()
        .with::<AmountAddEvent>("AmountAddEvent")
        .with::<AmountTransferEvent>("AmountTransferEvent")
}

/// Projected view of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account_id: EntityId,
    pub balance: i64,
    pub version: u64,
    pub updated_at: u64,
    pub transfers_out: u64,
}

/// Balances keyed by account.
#[derive(Debug, Default)]
pub struct AccountReadModel {
    accounts: DashMap<EntityId, AccountView>,
}

impl AccountReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &EntityId) -> Option<AccountView> {
        self.accounts.get(account_id).map(|view| view.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Record an event. Events at or below the stored version are ignored, so
    /// replays and out-of-order concurrent applies leave the newest balance.
    fn record(&self, event: &AccountEvent) {
        let mut view = self
            .accounts
            .entry(event.account_id().clone())
            .or_insert_with(|| AccountView {
                account_id: event.account_id().clone(),
                balance: 0,
                version: 0,
                updated_at: 0,
                transfers_out: 0,
            });

        if event.version() <= view.version {
            return;
        }
        if matches!(event, AccountEvent::AmountTransfer(_)) {
            view.transfers_out += 1;
        }
        view.balance = event.balance();
        view.version = event.version();
        view.updated_at = event.timestamp();
    }
}

/// Database-style follower keeping [`AccountReadModel`] current.
#[derive(Debug, Clone)]
pub struct AccountDb {
    model: Arc<AccountReadModel>,
}

impl AccountDb {
    pub fn new(model: Arc<AccountReadModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<AccountReadModel> {
        &self.model
    }
}

#[async_trait]
impl EventHandler<AccountEvent> for AccountDb {
    async fn apply(&self, event: Arc<AccountEvent>) -> Result<()> {
        tracing::trace!(
            account_id = %event.account_id(),
            version = event.version(),
            event_type = event.event_type(),
            "Projecting account event"
        );
        self.model.record(&event);
        Ok(())
    }

    fn is_concurrent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventWrapper;

    fn add(version: u64, amount: i64, balance: i64) -> AccountEvent {
        AmountAddEvent {
            base: EventBase::new(version, 1_000 * version),
            account_id: EntityId::new("acct-1"),
            amount,
            balance,
        }
        .into()
    }

    fn transfer(version: u64, amount: i64, balance: i64) -> AccountEvent {
        AmountTransferEvent {
            base: EventBase::new(version, 1_000 * version),
            account_id: EntityId::new("acct-1"),
            to_account_id: EntityId::new("acct-2"),
            amount,
            balance,
        }
        .into()
    }

    #[test]
    fn test_envelope_decodes_to_matching_variant() {
        let types = account_event_types();
        for event in [add(1, 500, 500), transfer(2, 200, 300)] {
            let bytes = EventWrapper::from_event(&event).unwrap().encode().unwrap();
            assert_eq!(types.decode_envelope(&bytes).unwrap(), event);
        }
    }

    #[test]
    fn test_payload_is_flat_json() {
        let json = serde_json::to_value(add(3, 10, 10)).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["account_id"], "acct-1");
        assert!(json.get("base").is_none());
    }

    #[test]
    fn test_event_is_owned_by_sending_account() {
        let owner = EntityId::new("acct-1");
        assert_eq!(Event::entity_id(&transfer(1, 5, 5)), Some(&owner));
    }

    #[tokio::test]
    async fn test_out_of_order_apply_keeps_latest_balance() {
        let model = Arc::new(AccountReadModel::new());
        let db = AccountDb::new(model.clone());

        db.apply(Arc::new(transfer(2, 200, 300))).await.unwrap();
        db.apply(Arc::new(add(1, 500, 500))).await.unwrap();
        db.apply(Arc::new(transfer(2, 200, 300))).await.unwrap();

        let view = model.get(&EntityId::new("acct-1")).unwrap();
        assert_eq!(view.balance, 300);
        assert_eq!(view.version, 2);
        assert_eq!(view.transfers_out, 1);
    }
}
