//! Outbound lead submission
//!
//! The core only hands out a read-only snapshot plus the computed
//! commission. Sinks own their transport, auth and retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::commission::CommissionResult;
use crate::config::IntegrationConfig;
use crate::domain::ApplicationState;
use crate::error::{ReinoError, Result};

/// Current state plus its commission, as seen by integrations
#[derive(Debug, Clone, Serialize)]
pub struct OutboundSnapshot {
    pub state: ApplicationState,
    pub commission: CommissionResult,
}

/// One lead handed to a sink
#[derive(Debug, Clone, Serialize)]
pub struct LeadSubmission {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub snapshot: OutboundSnapshot,
}

impl LeadSubmission {
    pub fn new(snapshot: OutboundSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            snapshot,
        }
    }

    /// Flat row for table-oriented backends
    pub fn to_row(&self) -> serde_json::Value {
        let state = &self.snapshot.state;
        let contact = state.contact();
        let allocations: serde_json::Map<String, serde_json::Value> = state
            .allocations()
            .iter()
            .map(|(key, amount)| (key.to_string(), json!(amount.to_string())))
            .collect();

        json!({
            "submission_id": self.id,
            "submitted_at": self.submitted_at,
            "name": contact.map(|c| c.name.as_str()),
            "email": contact.map(|c| c.email.as_str()),
            "phone": contact.map(|c| c.phone.as_str()),
            "contact_method": contact.map(|c| c.method.as_str()),
            "patrimonio": state.patrimonio().to_string(),
            "assets": state.selected_assets().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            "allocations": allocations,
            "rotation_index": state.rotation_index().value(),
            "annual_cost": self.snapshot.commission.total_annual_cost.to_string(),
            "unmatched_assets": self
                .snapshot
                .commission
                .unmatched()
                .map(|line| line.asset_key.to_string())
                .collect::<Vec<_>>(),
        })
    }

    pub fn total_annual_cost(&self) -> Decimal {
        self.snapshot.commission.total_annual_cost
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn submit(&self, submission: &LeadSubmission) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writes the submission to the log only
#[derive(Debug, Default)]
pub struct LoggingLeadSink;

#[async_trait]
impl LeadSink for LoggingLeadSink {
    async fn submit(&self, submission: &LeadSubmission) -> Result<()> {
        info!(
            submission_id = %submission.id,
            annual_cost = %submission.total_annual_cost(),
            row = %submission.to_row(),
            "lead submission"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Inserts one row per submission through the Supabase REST API
pub struct SupabaseLeadSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl SupabaseLeadSink {
    pub fn new(base_url: &str, table: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key,
        })
    }

    /// `Ok(None)` when no Supabase URL is configured
    pub fn from_config(config: &IntegrationConfig) -> Result<Option<Self>> {
        let Some(url) = config.supabase_url.as_deref() else {
            return Ok(None);
        };
        let api_key = std::env::var(&config.supabase_key_env).map_err(|_| {
            ReinoError::Integration(format!(
                "{} is not set but integration.supabase_url is",
                config.supabase_key_env
            ))
        })?;
        Self::new(
            url,
            &config.supabase_table,
            api_key,
            Duration::from_millis(config.request_timeout_ms),
        )
        .map(Some)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LeadSink for SupabaseLeadSink {
    async fn submit(&self, submission: &LeadSubmission) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(&submission.to_row())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReinoError::Integration(format!(
                "supabase insert failed: {} {}",
                status, body
            )));
        }
        info!(submission_id = %submission.id, "lead stored in supabase");
        Ok(())
    }

    fn name(&self) -> &str {
        "supabase"
    }
}
