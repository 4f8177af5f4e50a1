//! WorkflowGuard server entry point
//!
//! Serves:
//! - Workflow protection and version history API at /api/workflows/*
//! - HubSpot webhook receiver at /webhooks/hubspot
//! - Health check at /healthz

use workflowguard::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes from WORKFLOWGUARD_* and HUBSPOT_* variables
    let config = Config::default();

    start_server(config).await
}
