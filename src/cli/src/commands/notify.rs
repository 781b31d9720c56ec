//! Notify commands.
//!
//! Builds an account event, wraps it in an envelope, and posts it to the
//! follower of the account it belongs to.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use follow_core::domain::account::{AccountEvent, AmountAddEvent, AmountTransferEvent};
use follow_core::events::{EntityId, EventBase, EventWrapper};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// Credit an account
    Add {
        #[command(flatten)]
        common: EventArgs,
    },

    /// Move funds from an account to another one
    Transfer {
        #[command(flatten)]
        common: EventArgs,

        /// Receiving account
        #[arg(long)]
        to: String,
    },
}

#[derive(Args)]
pub struct EventArgs {
    /// Account id (a new one is generated when omitted)
    #[arg(short, long)]
    account: Option<String>,

    /// Event version, consecutive per account starting at 1
    #[arg(short = 'e', long = "event-version")]
    event_version: u64,

    /// Amount in minor units
    #[arg(long)]
    amount: i64,

    /// Balance after the event, in minor units
    #[arg(short, long)]
    balance: i64,

    /// Event timestamp in epoch millis (defaults to now)
    #[arg(long)]
    timestamp: Option<u64>,

    /// Wait until the event is applied
    #[arg(short, long)]
    wait: bool,
}

impl EventArgs {
    fn account_id(&self) -> EntityId {
        match &self.account {
            Some(id) => EntityId::new(id.as_str()),
            None => EntityId::new(uuid::Uuid::new_v4().to_string()),
        }
    }

    fn base(&self) -> EventBase {
        match self.timestamp {
            Some(ts) => EventBase::new(self.event_version, ts),
            None => EventBase::now(self.event_version),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct NotifyRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Confirmed")]
    confirmed: bool,
    #[tabled(rename = "Committed Version")]
    version: u64,
}

pub async fn execute(cmd: NotifyCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (event, wait) = match cmd {
        NotifyCommands::Add { common } => {
            let event = AccountEvent::from(AmountAddEvent {
                base: common.base(),
                account_id: common.account_id(),
                amount: common.amount,
                balance: common.balance,
            });
            (event, common.wait)
        }
        NotifyCommands::Transfer { common, to } => {
            let event = AccountEvent::from(AmountTransferEvent {
                base: common.base(),
                account_id: common.account_id(),
                to_account_id: EntityId::new(to),
                amount: common.amount,
                balance: common.balance,
            });
            (event, common.wait)
        }
    };

    let envelope = EventWrapper::from_event(&event)
        .and_then(|wrapper| wrapper.encode())
        .context("Failed to build envelope")?;

    let path = format!(
        "/api/v1/entities/{}/events?wait={}",
        event.account_id(),
        wait
    );
    let row: NotifyRow = client.post_bytes(&path, envelope).await?;

    if matches!(format, OutputFormat::Table) {
        if row.confirmed {
            output::print_success(&format!("Event applied to {}", row.entity_id));
        } else {
            output::print_info(&format!("Event accepted for {}", row.entity_id));
        }
    }
    output::print_record(&row, format)
}
