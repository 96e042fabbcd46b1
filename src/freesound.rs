//! Binding for the parts of the Freesound API the search views use.

use crate::error::ApiResult;
use crate::executor::{Fetched, HttpExecutor, RequestSpec};
use crate::pagination::PageSource;
use crate::types::{Page, Sound};
use async_trait::async_trait;
use tracing::info;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://freesound.org/apiv2";

/// Fields requested for every listing.
pub const DEFAULT_SOUND_FIELDS: &str =
    "id,name,tags,description,username,license,duration,samplerate,bitrate,channels,filesize,previews,images";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchOptions {
    pub query: String,
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub page_size: Option<u32>,
    pub fields: Option<String>,
}

impl SearchOptions {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        // The API rejects an empty query; a single space means "everything".
        let query = if self.query.trim().is_empty() {
            " ".to_string()
        } else {
            self.query.clone()
        };
        let mut params = vec![("query", query)];
        if let Some(v) = &self.filter {
            params.push(("filter", v.clone()));
        }
        if let Some(v) = &self.sort {
            params.push(("sort", v.clone()));
        }
        if let Some(v) = self.page_size {
            params.push(("page_size", v.to_string()));
        }
        if let Some(v) = &self.fields {
            params.push(("fields", v.clone()));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct FreesoundClient {
    base: Url,
    executor: HttpExecutor,
}

impl FreesoundClient {
    pub fn new(base_url: &str, executor: HttpExecutor) -> ApiResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, executor })
    }

    pub fn executor(&self) -> &HttpExecutor {
        &self.executor
    }

    /// First page of a text search.
    pub async fn text_search(&self, options: &SearchOptions) -> ApiResult<Fetched<Page>> {
        info!(query = %options.query, filter = ?options.filter, "text search");
        let mut url = self.base.join("search/text/")?;
        url.query_pairs_mut().extend_pairs(options.params());
        self.executor.execute(RequestSpec::get(url)).await
    }

    pub async fn get_sound(&self, id: u64) -> ApiResult<Fetched<Sound>> {
        let url = self.base.join(&format!("sounds/{}/", id))?;
        self.executor.execute(RequestSpec::get(url)).await
    }
}

#[async_trait]
impl PageSource for FreesoundClient {
    async fn fetch_cursor(&self, cursor: &str) -> ApiResult<Fetched<Page>> {
        let url = Url::parse(cursor)?;
        self.executor.execute(RequestSpec::get(url)).await
    }
}
