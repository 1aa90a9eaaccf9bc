//! Microsoft Graph HTTP client
//!
//! Fetches the signed-in user's messages one page at a time.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::time::Duration;
use url::Url;

use super::api::MessagePage;
use super::normalize::normalize_message;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::models::{Message, UserId};
use crate::sync::{Cursor, Page, PageFetcher};

/// Graph API client for listing messages
pub struct GraphClient {
    agent: ureq::Agent,
    base_url: Url,
    page_size: usize,
    max_page_bytes: u64,
}

impl GraphClient {
    /// Graph API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://graph.microsoft.com/v1.0";

    /// Message fields requested from the provider
    const SELECT_FIELDS: &'static str =
        "id,receivedDateTime,subject,bodyPreview,body,isRead,sender,toRecipients";

    /// Largest page body read by default; full HTML bodies make pages big
    pub const DEFAULT_MAX_PAGE_BYTES: u64 = 64 * 1024 * 1024;

    /// Create a new Graph client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. [`Self::DEFAULT_BASE_URL`]
    /// * `page_size` - Messages requested per page (`$top`)
    /// * `timeout` - Whole-request timeout
    pub fn new(base_url: &str, page_size: usize, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid Graph base URL: {}", base_url))?;

        // Non-2xx statuses are classified here, not turned into ureq errors
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            agent,
            base_url,
            page_size,
            max_page_bytes: Self::DEFAULT_MAX_PAGE_BYTES,
        })
    }

    /// Set the largest page body the client will read
    pub fn with_max_page_bytes(mut self, limit: u64) -> Self {
        self.max_page_bytes = limit;
        self
    }

    /// Create a client from worker settings
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Ok(Self::new(
            &settings.graph_base_url,
            settings.page_size,
            settings.http_timeout(),
        )?
        .with_max_page_bytes(settings.max_page_bytes))
    }

    /// URL of the first page of `me/messages`
    pub fn first_page_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/me/messages",
            self.base_url.as_str().trim_end_matches('/')
        ))
        .context("Failed to build messages URL")?;
        url.query_pairs_mut()
            .append_pair("$select", Self::SELECT_FIELDS)
            .append_pair("$top", &self.page_size.to_string());
        Ok(url)
    }

    /// Resolve the URL for a page request
    ///
    /// Continuation links are absolute URLs from the provider. A link pointing
    /// at a different origin is refused so the bearer token never leaves the
    /// configured API host.
    fn page_url(&self, cursor: Option<&Cursor>) -> Result<Url, SyncError> {
        let Some(cursor) = cursor else {
            return self
                .first_page_url()
                .map_err(|e| SyncError::Transport(format!("{:#}", e)));
        };

        let link = Url::parse(cursor.as_str()).map_err(|e| {
            SyncError::validation(None, format!("unparseable continuation link: {}", e))
        })?;

        if link.origin() != self.base_url.origin() {
            warn!(
                "Refusing continuation link to foreign origin {}",
                link.origin().ascii_serialization()
            );
            return Err(SyncError::validation(
                None,
                format!(
                    "continuation link points at foreign origin {}",
                    link.origin().ascii_serialization()
                ),
            ));
        }

        Ok(link)
    }

    /// Fetch and decode one raw page
    fn get_page(&self, url: &Url, access_token: &str) -> Result<MessagePage, SyncError> {
        debug!("GET {}", url.path());

        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .call()
            .map_err(|e| SyncError::Transport(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            401 | 403 => return Err(SyncError::AuthRejected { status }),
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                return Err(SyncError::RateLimited { retry_after_secs });
            }
            _ => {
                return Err(SyncError::Transport(format!(
                    "unexpected HTTP status {}",
                    status
                )));
            }
        }

        response
            .body_mut()
            .with_config()
            .limit(self.max_page_bytes)
            .read_json::<MessagePage>()
            .map_err(|e| SyncError::Transport(format!("failed to decode message page: {}", e)))
    }
}

impl PageFetcher for GraphClient {
    fn fetch(
        &self,
        owner: &UserId,
        cursor: Option<&Cursor>,
        access_token: &str,
    ) -> Result<Page, SyncError> {
        let url = self.page_url(cursor)?;
        let raw = self.get_page(&url, access_token)?;

        // One malformed message rejects the whole page
        let messages = raw
            .value
            .into_iter()
            .map(|m| normalize_message(m, owner))
            .collect::<Result<Vec<Message>, SyncError>>()?;

        debug!(
            "Page with {} messages, more: {}",
            messages.len(),
            raw.next_link.is_some()
        );

        Ok(Page {
            messages,
            next: raw.next_link.map(Cursor::new),
        })
    }
}
