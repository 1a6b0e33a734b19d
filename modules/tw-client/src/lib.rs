pub mod error;
mod parse;
pub mod types;

pub use error::{Result, TwError};
pub use types::{
    ConquerRecord, KillBoard, KillRecord, PlayerRecord, ServerListing, TribeRecord,
    VillageRecord,
};

use std::time::Duration;

use chrono::{DateTime, Utc};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Client for one world's public data endpoints (`https://en115.tribalwars.net`).
#[derive(Clone)]
pub struct WorldClient {
    client: reqwest::Client,
    base_url: String,
}

impl WorldClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(default_http_client(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn load_players(&self) -> Result<Vec<PlayerRecord>> {
        let body = self.get_text("/map/player.txt").await?;
        parse::parse_players(&body)
    }

    pub async fn load_tribes(&self) -> Result<Vec<TribeRecord>> {
        let body = self.get_text("/map/ally.txt").await?;
        parse::parse_tribes(&body)
    }

    pub async fn load_villages(&self) -> Result<Vec<VillageRecord>> {
        let body = self.get_text("/map/village.txt").await?;
        parse::parse_villages(&body)
    }

    /// Fetch one opponents-defeated ranking, either the player or the tribe board.
    pub async fn load_kills(&self, board: KillBoard, tribes: bool) -> Result<Vec<KillRecord>> {
        let suffix = if tribes { "_tribe" } else { "" };
        let path = format!("/map/{}{}.txt", board.file_stem(), suffix);
        let body = self.get_text(&path).await?;
        parse::parse_kills(&body)
    }

    /// Conquers newer than `since`. The endpoint only serves the last 24 hours.
    pub async fn load_conquers(&self, since: DateTime<Utc>) -> Result<Vec<ConquerRecord>> {
        let path = format!(
            "/interface.php?func=get_conquer_extended&since={}",
            since.timestamp()
        );
        let body = self.get_text(&path).await?;
        parse::parse_conquers(&body)
    }

    /// World settings document, returned verbatim.
    pub async fn get_config(&self) -> Result<String> {
        self.get_text("/interface.php?func=get_config").await
    }

    pub async fn get_building_config(&self) -> Result<String> {
        self.get_text("/interface.php?func=get_building_info").await
    }

    pub async fn get_unit_config(&self) -> Result<String> {
        self.get_text("/interface.php?func=get_unit_info").await
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "Fetching world data");
        get_text(&self.client, &url).await
    }
}

/// Client for a version's server directory (`en.tribalwars.net`).
#[derive(Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
}

impl DirectoryClient {
    pub fn new() -> Self {
        Self::with_client(default_http_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// List the servers a version currently advertises.
    pub async fn load_servers(&self, host: &str) -> Result<Vec<ServerListing>> {
        let url = format!("https://{}/backend/get_servers.php", host);
        let body = get_text(&self.client, &url).await?;
        parse::parse_server_map(&body)
    }
}

impl Default for DirectoryClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TwError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    Ok(resp.text().await?)
}
