//! Concrete followers built on the core.

pub mod account;

pub use account::{
    account_event_types, AccountDb, AccountEvent, AccountReadModel, AccountView, AmountAddEvent,
    AmountTransferEvent,
};
