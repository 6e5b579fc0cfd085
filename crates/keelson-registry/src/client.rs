//! Distribution API client
//!
//! Lists tags with `GET /v2/<repository>/tags/list`, following
//! `Link: <...>; rel="next"` pages. A 401 carrying a bearer challenge is
//! answered by fetching a pull token from the challenge realm and retrying
//! the request once.

use crate::auth::{Auth, Challenge};
use crate::error::{RegistryError, Result};
use crate::lister::TagLister;
use async_trait::async_trait;
use dashmap::DashMap;
use keelson_types::ImageRef;
use reqwest::header::{LINK, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Tags requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on followed pages for one repository
const MAX_PAGES: usize = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Client for one registry endpoint
pub struct DistributionClient {
    client: Client,
    base_url: String,
    auth: Auth,
    page_size: u32,

    /// Pull tokens by repository
    tokens: DashMap<String, String>,
}

impl DistributionClient {
    /// `base_url` is `https://host[:port]`; a bare host gets `https://`
    pub fn new(base_url: impl Into<String>, auth: Auth) -> Result<Self> {
        let base_url = normalize_base(&base_url.into());
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("keelson/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::network(&base_url, e))?;

        Ok(Self {
            client,
            base_url,
            auth,
            page_size: DEFAULT_PAGE_SIZE,
            tokens: DashMap::new(),
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All tags of a repository, in registry order
    #[instrument(skip(self), fields(registry = %self.base_url))]
    pub async fn list_repository_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut url = format!(
            "{}/v2/{}/tags/list?n={}",
            self.base_url, repository, self.page_size
        );
        let mut tags = Vec::new();

        for page in 0..MAX_PAGES {
            let response = self.get(&url, repository).await?;
            let next = next_link(&response).map(|link| self.resolve(&link));

            let list: TagList = response
                .json()
                .await
                .map_err(|e| RegistryError::network(&self.base_url, format!("decoding tag list: {}", e)))?;
            let page_tags = list.tags.unwrap_or_default();
            debug!(page, count = page_tags.len(), "tag page fetched");
            tags.extend(page_tags);

            match next {
                Some(next_url) => url = next_url,
                None => return Ok(tags),
            }
        }

        warn!(repository, pages = MAX_PAGES, "tag pagination truncated");
        Ok(tags)
    }

    /// GET with credentials, answering one bearer challenge
    async fn get(&self, url: &str, repository: &str) -> Result<Response> {
        let response = self.send(url, repository).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return self.check(response, repository);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse);
        let Some(challenge) = challenge else {
            return Err(RegistryError::auth(&self.base_url, "unauthorized"));
        };
        if matches!(self.auth, Auth::Bearer(_)) {
            return Err(RegistryError::auth(&self.base_url, "token rejected"));
        }

        let token = self.fetch_token(&challenge, repository).await?;
        self.tokens.insert(repository.to_string(), token);

        let retried = self.send(url, repository).await?;
        self.check(retried, repository)
    }

    async fn send(&self, url: &str, repository: &str) -> Result<Response> {
        let request = self.client.get(url);
        let request = match self.tokens.get(repository) {
            Some(token) => request.bearer_auth(token.value()),
            None => self.auth.apply(request),
        };
        request
            .send()
            .await
            .map_err(|e| RegistryError::network(&self.base_url, e))
    }

    fn check(&self, response: Response, repository: &str) -> Result<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::auth(
                &self.base_url,
                format!("{} listing {}", response.status(), repository),
            )),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound {
                repository: repository.to_string(),
            }),
            status => Err(RegistryError::network(
                &self.base_url,
                format!("unexpected status {} listing {}", status, repository),
            )),
        }
    }

    async fn fetch_token(&self, challenge: &Challenge, repository: &str) -> Result<String> {
        let mut query = vec![("scope", challenge.scope_for(repository))];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        debug!(realm = %challenge.realm, "fetching registry token");

        let response = self
            .auth
            .apply(self.client.get(&challenge.realm).query(&query))
            .send()
            .await
            .map_err(|e| RegistryError::network(&challenge.realm, e))?;
        if !response.status().is_success() {
            return Err(RegistryError::auth(
                &self.base_url,
                format!("token endpoint returned {}", response.status()),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::auth(&self.base_url, format!("decoding token: {}", e)))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| RegistryError::auth(&self.base_url, "token response carried no token"))
    }

    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl TagLister for DistributionClient {
    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>> {
        self.list_repository_tags(&image.repository).await
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

fn normalize_base(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("https://{}", base)
    }
}

/// Target of a `Link: <url>; rel="next"` header
fn next_link(response: &Response) -> Option<String> {
    let header = response.headers().get(LINK)?.to_str().ok()?;
    header.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"));
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}
