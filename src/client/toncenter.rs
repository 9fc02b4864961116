use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::boc::TonAddress;
use crate::client::rate_limit::TokenBucketLimiter;

/// Per-request timeout; the rate limiter provides the only other pacing.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 1000;

/// One external-out message returned by the messages endpoint.
#[derive(Debug, Clone)]
pub struct OutMessage {
    /// Base64 body of the log message.
    pub body: String,
    pub created_lt: i64,
    pub created_at: i64,
    /// Base64 of the 32-byte transaction hash, as served by the API.
    pub tx_hash: String,
}

/// TON Center v3 API client.
///
/// Both operations go through the shared process-global token bucket. The API
/// key travels as the `X-Api-Key` header and the `api_key` query parameter,
/// and is stripped from every URL that reaches a log line or error message.
pub struct TonCenterClient {
    http: Client,
    base_url: Url,
    api_key: String,
    limiter: Arc<TokenBucketLimiter>,
}

impl TonCenterClient {
    pub fn new(base_url: &str, api_key: String, limiter: Arc<TokenBucketLimiter>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid TON Center base url")?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url, api_key, limiter })
    }

    /// Fetch external-out messages from `source` within `(start_utime,
    /// end_utime]`, ascending by logical time, one page at a time.
    pub async fn fetch_messages(
        &self,
        source: &TonAddress,
        start_utime: i64,
        end_utime: i64,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<OutMessage>> {
        let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size.min(MAX_PAGE_SIZE) };

        let mut url = self.endpoint("api/v3/messages")?;
        url.query_pairs_mut()
            .append_pair("source", &source.to_friendly())
            .append_pair("destination", "null")
            .append_pair("limit", &page_size.to_string())
            .append_pair("offset", &(page * page_size).to_string())
            .append_pair("sort", "asc");
        if start_utime > 0 {
            url.query_pairs_mut().append_pair("start_utime", &start_utime.to_string());
        }
        if end_utime > 0 {
            url.query_pairs_mut().append_pair("end_utime", &end_utime.to_string());
        }

        let response: MessagesResponse = self.get(url).await?;

        let mut messages = Vec::with_capacity(response.messages.len());
        for m in response.messages {
            let body = match m.message_content {
                Some(content) if !content.body.is_empty() => content.body,
                _ => continue,
            };
            let created_lt = m.created_lt.parse().unwrap_or_else(|_| {
                warn!("unparseable created_lt {:?}", m.created_lt);
                0
            });
            let created_at = m.created_at.parse().unwrap_or_else(|_| {
                warn!("unparseable created_at {:?}", m.created_at);
                0
            });
            messages.push(OutMessage {
                body,
                created_lt,
                created_at,
                tx_hash: m.out_msg_tx_hash,
            });
        }
        Ok(messages)
    }

    /// Fetch account state BOCs for a set of addresses.
    ///
    /// The result is keyed by both the raw and the user-friendly form of each
    /// address so lookups by either succeed. Accounts without data are absent.
    pub async fn fetch_account_states(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, String>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let mut url = self.endpoint("api/v3/accountStates")?;
        for address in addresses {
            url.query_pairs_mut().append_pair("address", address);
        }
        url.query_pairs_mut().append_pair("include_boc", "true");

        let response: AccountStatesResponse = self.get(url).await?;

        let mut result = HashMap::with_capacity(response.accounts.len() * 2);
        for account in response.accounts {
            let boc = account.data_boc.unwrap_or_default();
            if let Some(entry) = response.address_book.get(&account.address) {
                if !entry.user_friendly.is_empty() {
                    result.insert(entry.user_friendly.clone(), boc.clone());
                }
            }
            result.insert(account.address, boc);
        }
        Ok(result)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, mut url: Url) -> Result<T> {
        if !self.api_key.is_empty() {
            url.query_pairs_mut().append_pair("api_key", &self.api_key);
        }
        let safe_url = redact_api_key(&url);

        self.limiter.acquire().await;

        let mut request = self.http.get(url.clone());
        if !self.api_key.is_empty() {
            request = request.header("X-Api-Key", &self.api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {safe_url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GET {safe_url} status {status} body: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("GET {safe_url}: invalid response body"))
    }
}

/// Copy of the URL with the `api_key` query parameter removed, safe for logs
/// and error messages.
fn redact_api_key(url: &Url) -> Url {
    let mut safe = url.clone();
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "api_key")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    safe.query_pairs_mut().clear();
    for (k, v) in &retained {
        safe.query_pairs_mut().append_pair(k, v);
    }
    if retained.is_empty() {
        safe.set_query(None);
    }
    safe
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    created_lt: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    out_msg_tx_hash: String,
    message_content: Option<RawMessageContent>,
}

#[derive(Debug, Deserialize)]
struct RawMessageContent {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct AccountStatesResponse {
    #[serde(default)]
    accounts: Vec<RawAccountState>,
    #[serde(default)]
    address_book: HashMap<String, AddressBookEntry>,
}

#[derive(Debug, Deserialize)]
struct RawAccountState {
    address: String,
    data_boc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressBookEntry {
    #[serde(default)]
    user_friendly: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_never_reaches_log_urls() {
        let mut url = Url::parse("https://toncenter.com/api/v3/messages").unwrap();
        url.query_pairs_mut()
            .append_pair("source", "EQC8rUZqR_pWV1BylWUlPNBzyiTYVoBEmQkMIQDZXICfnuRr")
            .append_pair("api_key", "super-secret")
            .append_pair("sort", "asc");

        let safe = redact_api_key(&url).to_string();
        assert!(!safe.contains("super-secret"));
        assert!(!safe.contains("api_key"));
        assert!(safe.contains("sort=asc"));
        assert!(safe.contains("source="));
    }

    #[test]
    fn messages_response_parses_the_v3_shape() {
        let sample = r#"{
            "messages": [
                {
                    "hash": "yvRrBw4i+S0nNmXU18xEFdJs6bqaoI/3ub6N5ecoJfk=",
                    "source": "0:BCAD466A47FA565750729565253CD073CA24D856804499090C2100D95C809F9E",
                    "destination": null,
                    "created_lt": "60505066000009",
                    "created_at": "1755293452",
                    "out_msg_tx_hash": "AdhzLJzUq/TfP30M1JJhclw42RN2c3ceW+e0HVeT6b0=",
                    "message_content": {
                        "hash": "0qkyuK0NWOyPGg39cHuCwVRPOqrOEfTyKycxhTcP/Q4=",
                        "body": "dGVzdA=="
                    }
                }
            ],
            "address_book": {},
            "metadata": {}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(sample).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].created_lt, "60505066000009");
        assert_eq!(
            parsed.messages[0].out_msg_tx_hash,
            "AdhzLJzUq/TfP30M1JJhclw42RN2c3ceW+e0HVeT6b0="
        );
    }

    #[test]
    fn account_states_response_parses_with_missing_boc() {
        let sample = r#"{
            "accounts": [
                {"address": "0:AB", "data_boc": null},
                {"address": "0:CD", "data_boc": "dGVzdA=="}
            ],
            "address_book": {
                "0:CD": {"user_friendly": "EQDN"}
            }
        }"#;
        let parsed: AccountStatesResponse = serde_json::from_str(sample).unwrap();
        assert_eq!(parsed.accounts.len(), 2);
        assert!(parsed.accounts[0].data_boc.is_none());
        assert_eq!(parsed.address_book["0:CD"].user_friendly, "EQDN");
    }
}
