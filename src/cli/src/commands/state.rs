//! Committed state of an entity.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StateArgs {
    /// Entity id
    entity_id: String,
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct StateRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Timestamp")]
    timestamp: u64,
    #[tabled(rename = "Active")]
    active: bool,
}

pub async fn execute(args: StateArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let path = format!("/api/v1/entities/{}", args.entity_id);
    let row: StateRow = client.get(&path).await?;
    output::print_record(&row, format)
}
