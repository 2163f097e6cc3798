//! HTTP client for the matchmaking oracle and orchestration layer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;

use super::{
    AllocationSource, BackfillOptions, MatchPayload, MatchProperties, MatchmakerOracle,
    OracleError, ServerConfig, TicketOptions, TicketPlayer, TicketStatus,
};

/// How often the allocation push subscription retries after a failed watch.
const WATCH_RETRY_MS: u64 = 1_000;

/// Oracle client for ticket, backfill and allocation operations.
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTicketRequest {
    players: Vec<TicketPlayer>,
    queue_name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTicket {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationEvent {
    allocation_id: String,
}

impl OracleClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.oracle_url.clone(),
            api_key: config.oracle_api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, OracleError> {
        let response = builder.send().await.map_err(OracleError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(OracleError::Parse)
    }

    async fn send_no_content(&self, builder: reqwest::RequestBuilder) -> Result<(), OracleError> {
        let response = builder.send().await.map_err(OracleError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Subscribe to allocation push notifications from the orchestration
    /// layer. A supervised long-poll task feeds allocation ids into the
    /// returned channel; watch failures are logged and retried, never fatal.
    pub fn subscribe_allocations(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clone();

        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }

                let watch = client
                    .send_json::<AllocationEvent>(
                        client.request(reqwest::Method::GET, "/v1/allocations/watch"),
                    )
                    .await;

                match watch {
                    Ok(event) => {
                        debug!(allocation_id = %event.allocation_id, "Allocation event received");
                        if tx.send(event.allocation_id).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Allocation watch failed, retrying");
                        tokio::time::sleep(tokio::time::Duration::from_millis(WATCH_RETRY_MS))
                            .await;
                    }
                }
            }
        });

        rx
    }
}

#[async_trait]
impl MatchmakerOracle for OracleClient {
    async fn create_ticket(
        &self,
        players: Vec<TicketPlayer>,
        options: TicketOptions,
    ) -> Result<String, OracleError> {
        let body = CreateTicketRequest {
            players,
            queue_name: options.queue_name,
        };
        let created: CreatedTicket = self
            .send_json(self.request(reqwest::Method::POST, "/v1/tickets").json(&body))
            .await?;
        Ok(created.id)
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketStatus, OracleError> {
        self.send_json(self.request(reqwest::Method::GET, &format!("/v1/tickets/{ticket_id}")))
            .await
    }

    async fn delete_ticket(&self, ticket_id: &str) -> Result<(), OracleError> {
        self.send_no_content(
            self.request(reqwest::Method::DELETE, &format!("/v1/tickets/{ticket_id}")),
        )
        .await
    }

    async fn create_backfill_ticket(&self, options: BackfillOptions) -> Result<String, OracleError> {
        let created: CreatedTicket = self
            .send_json(
                self.request(reqwest::Method::POST, "/v1/backfill")
                    .json(&options),
            )
            .await?;
        Ok(created.id)
    }

    async fn update_backfill_ticket(
        &self,
        ticket_id: &str,
        properties: MatchProperties,
    ) -> Result<(), OracleError> {
        self.send_no_content(
            self.request(reqwest::Method::PUT, &format!("/v1/backfill/{ticket_id}"))
                .json(&properties),
        )
        .await
    }

    async fn approve_backfill_ticket(
        &self,
        ticket_id: &str,
    ) -> Result<MatchProperties, OracleError> {
        self.send_json(self.request(
            reqwest::Method::POST,
            &format!("/v1/backfill/{ticket_id}/approvals"),
        ))
        .await
    }

    async fn delete_backfill_ticket(&self, ticket_id: &str) -> Result<(), OracleError> {
        self.send_no_content(
            self.request(reqwest::Method::DELETE, &format!("/v1/backfill/{ticket_id}")),
        )
        .await
    }
}

#[async_trait]
impl AllocationSource for OracleClient {
    async fn server_config(&self) -> Result<ServerConfig, OracleError> {
        self.send_json(self.request(reqwest::Method::GET, "/v1/server/config"))
            .await
    }

    async fn allocation_payload(&self, allocation_id: &str) -> Result<MatchPayload, OracleError> {
        self.send_json(self.request(
            reqwest::Method::GET,
            &format!("/v1/allocations/{allocation_id}/payload"),
        ))
        .await
    }
}
