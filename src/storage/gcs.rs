//! Cloud Storage JSON API backend
//!
//! Preconditions are forwarded as `ifGenerationMatch` / `ifMetagenerationMatch`
//! query parameters. HTTP 412 maps to [`StoreError::PreconditionFailed`] and
//! 404 to [`StoreError::NotFound`]. Token acquisition is external: the bearer
//! token is supplied through configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{ObjectStat, ObjectStore, Preconditions, StoreError, StoreResult, WriteResult};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    /// JSON API base URL (an emulator URL in tests and local runs)
    pub endpoint: String,
    pub token: Option<String>,
}

impl GcsConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
        }
    }
}

/// Object resource as returned by the JSON API (numbers arrive as strings)
#[derive(Debug, Deserialize)]
struct ObjectResource {
    generation: String,
    metageneration: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

pub struct GcsStore {
    client: Client,
    config: GcsConfig,
}

impl GcsStore {
    pub fn new(config: GcsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn base(&self) -> String {
        self.config.endpoint.trim_end_matches('/').to_string()
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base(),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(path)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn with_preconditions(request: RequestBuilder, pre: &Preconditions) -> RequestBuilder {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(g) = pre.if_generation_match {
            query.push(("ifGenerationMatch", g.to_string()));
        }
        if let Some(m) = pre.if_metageneration_match {
            query.push(("ifMetagenerationMatch", m.to_string()));
        }
        request.query(&query)
    }

    async fn check(response: Response, path: &str) -> StoreResult<Response> {
        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(path.to_string())),
            StatusCode::PRECONDITION_FAILED => Err(StoreError::PreconditionFailed(path.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Backend(format!(
                    "{} returned {}: {}",
                    path,
                    status,
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }
}

fn parse_number(field: &str, raw: &str) -> StoreResult<u64> {
    raw.parse()
        .map_err(|_| StoreError::Backend(format!("invalid {} '{}'", field, raw)))
}

impl ObjectResource {
    fn into_stat(self) -> StoreResult<ObjectStat> {
        Ok(ObjectStat {
            generation: parse_number("generation", &self.generation)?,
            metageneration: parse_number("metageneration", &self.metageneration)?,
            size: match self.size {
                Some(s) => parse_number("size", &s)?,
                None => 0,
            },
            updated_at: self.updated.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn backend(&self) -> &'static str {
        "gcs"
    }

    async fn write(
        &self,
        path: &str,
        body: Vec<u8>,
        preconditions: Preconditions,
    ) -> StoreResult<WriteResult> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.base(),
            urlencoding::encode(&self.config.bucket)
        );
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", path)])
            .header(reqwest::header::CONTENT_TYPE, content_type_for(path))
            .body(body);
        let request = Self::with_preconditions(self.authorized(request), &preconditions);

        let response = Self::check(request.send().await?, path).await?;
        let stat = response.json::<ObjectResource>().await?.into_stat()?;
        Ok(WriteResult {
            generation: stat.generation,
            metageneration: stat.metageneration,
        })
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let request = self
            .client
            .get(self.object_url(path))
            .query(&[("alt", "media")]);
        let response = Self::check(self.authorized(request).send().await?, path).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn stat(&self, path: &str) -> StoreResult<ObjectStat> {
        let request = self.client.get(self.object_url(path));
        let response = Self::check(self.authorized(request).send().await?, path).await?;
        response.json::<ObjectResource>().await?.into_stat()
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let url = format!(
            "{}/storage/v1/b/{}/o",
            self.base(),
            urlencoding::encode(&self.config.bucket)
        );
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("prefix", prefix.to_string()),
                ("fields", "items(name),nextPageToken".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self.client.get(&url).query(&query);
            let response = Self::check(self.authorized(request).send().await?, prefix).await?;
            let page: ListPage = response.json().await?;
            names.extend(page.items.into_iter().map(|i| i.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, path: &str, preconditions: Preconditions) -> StoreResult<()> {
        let request = self.client.delete(self.object_url(path));
        let request = Self::with_preconditions(self.authorized(request), &preconditions);
        match Self::check(request.send().await?, path).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".ndjson") {
        "application/x-ndjson"
    } else {
        "application/json"
    }
}
