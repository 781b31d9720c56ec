//! Account read model lookup.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct AccountArgs {
    /// Account id
    account_id: String,
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct AccountRow {
    #[tabled(rename = "Account")]
    account_id: String,
    #[tabled(rename = "Balance")]
    balance: i64,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Transfers Out")]
    transfers_out: u64,
    #[tabled(rename = "Updated At")]
    #[serde(default)]
    updated_at: u64,
}

pub async fn execute(args: AccountArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let path = format!("/api/v1/accounts/{}", args.account_id);
    let row: AccountRow = client.get(&path).await?;
    output::print_record(&row, format)
}
