//! Materializes paginated collections.
//!
//! # Design
//! Backends paginate in three incompatible ways. The dialect is decided once,
//! from the first response, and then drives both how items are read from
//! each page and how the next page is requested:
//!
//! | Dialect          | First page shape                         | Next page query        |
//! |------------------|------------------------------------------|------------------------|
//! | `CountResults`   | `{"count": N, "results": [...]}`         | `page_size=P&page=K`   |
//! | `HeaderTotal`    | `[...]` with the total in a header       | `per_page=P&page=K`    |
//! | `TotalElements`  | `{"totalElements": N, "content": [...]}` | `$skip=K`              |
//!
//! A body that matches none of them is a single object and is returned
//! as-is. Pages are fetched strictly in order; every fetched page must add
//! items or paging stops, so the loop always terminates.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpResponse};

pub const DEFAULT_TOTAL_HEADER: &str = "X-Total";
pub const DEFAULT_INITIAL_PAGE_SIZE: usize = 100;

/// A collection response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    CountResults,
    HeaderTotal,
    TotalElements,
}

/// Where the next page starts, in the dialect's own terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    PageSize { page: usize, page_size: usize },
    PerPage { page: usize, per_page: usize },
    Skip { offset: usize },
}

impl PageCursor {
    /// Query string fragment selecting this page.
    pub fn to_query(&self) -> String {
        match self {
            PageCursor::PageSize { page, page_size } => {
                format!("page_size={page_size}&page={page}")
            }
            PageCursor::PerPage { page, per_page } => format!("per_page={per_page}&page={page}"),
            PageCursor::Skip { offset } => format!("$skip={offset}"),
        }
    }
}

/// What a lookup produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Every item of a collection, in server order.
    Items(Vec<Value>),
    /// A body that is not a collection.
    Single(Value),
    /// 404 on a lookup that does not throw on "not found".
    Absent,
}

impl Fetched {
    /// Flatten into a list: a single object becomes a one-element list and
    /// an absent result an empty one.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Fetched::Items(items) => items,
            Fetched::Single(value) => vec![value],
            Fetched::Absent => Vec::new(),
        }
    }

    pub fn into_single(self) -> Option<Value> {
        match self {
            Fetched::Single(value) => Some(value),
            Fetched::Items(items) => items.into_iter().next(),
            Fetched::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Fetched::Absent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerOptions {
    /// Commit to one dialect instead of detecting it.
    pub dialect: Option<Dialect>,
    /// Header carrying the total for [`Dialect::HeaderTotal`].
    pub total_header: String,
    /// Fail with `NotFound` on an empty collection or a 404.
    pub throw_on_not_found: bool,
    /// `per_page` sent with the first request when the header dialect is pinned.
    pub initial_page_size: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            dialect: None,
            total_header: DEFAULT_TOTAL_HEADER.to_string(),
            throw_on_not_found: true,
            initial_page_size: DEFAULT_INITIAL_PAGE_SIZE,
        }
    }
}

impl PagerOptions {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn throw_on_not_found(mut self, throw: bool) -> Self {
        self.throw_on_not_found = throw;
        self
    }

    pub fn total_header(mut self, name: impl Into<String>) -> Self {
        self.total_header = name.into();
        self
    }
}

/// Progress through one collection.
#[derive(Debug)]
struct PageState {
    dialect: Dialect,
    items: Vec<Value>,
    total: usize,
    page_size: usize,
    next_page: usize,
}

impl PageState {
    fn cursor(&self) -> PageCursor {
        match self.dialect {
            Dialect::CountResults => PageCursor::PageSize {
                page: self.next_page,
                page_size: self.page_size,
            },
            Dialect::HeaderTotal => PageCursor::PerPage {
                page: self.next_page,
                per_page: self.page_size,
            },
            Dialect::TotalElements => PageCursor::Skip {
                offset: self.items.len(),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionPager {
    options: PagerOptions,
}

impl CollectionPager {
    pub fn new(options: PagerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    /// Turn the first response for `url` into the complete result,
    /// requesting further pages through `fetch_page`.
    ///
    /// Only the first response decides between collection and single
    /// object. Once a collection is recognised it stays one: a follow-up
    /// page that adds no items ends paging with a warning, and the items
    /// collected so far are returned even if fewer than the reported total.
    pub fn fetch_all<F>(
        &self,
        url: &str,
        initial: HttpResponse,
        mut fetch_page: F,
    ) -> Result<Fetched>
    where
        F: FnMut(&PageCursor) -> Result<HttpResponse>,
    {
        if initial.status == 404 {
            return self.nothing_found(url);
        }

        let body = decode(url, &initial)?;
        let Some(mut state) = self.detect(&initial, &body) else {
            debug!(%url, "response is a single object");
            return Ok(Fetched::Single(body));
        };

        debug!(
            %url,
            dialect = ?state.dialect,
            found = state.items.len(),
            total = state.total,
            page_size = state.page_size,
            "found collection"
        );

        if state.items.is_empty() {
            if self.options.throw_on_not_found {
                return Err(not_found(url));
            }
            return Ok(Fetched::Items(Vec::new()));
        }

        while state.items.len() < state.total {
            let cursor = state.cursor();
            let page = fetch_page(&cursor)?;
            let items = page_items(state.dialect, url, &decode(url, &page)?)?;
            if items.is_empty() {
                warn!(
                    %url,
                    query = %cursor.to_query(),
                    found = state.items.len(),
                    total = state.total,
                    "page added no items, stopping"
                );
                break;
            }
            state.items.extend(items);
            state.next_page += 1;
            debug!(
                %url,
                found = state.items.len(),
                total = state.total,
                "fetched additional results"
            );
        }

        Ok(Fetched::Items(state.items))
    }

    fn nothing_found(&self, url: &str) -> Result<Fetched> {
        if self.options.throw_on_not_found {
            return Err(not_found(url));
        }
        Ok(Fetched::Absent)
    }

    fn detect(&self, response: &HttpResponse, body: &Value) -> Option<PageState> {
        let candidates: &[Dialect] = match &self.options.dialect {
            Some(pinned) => std::slice::from_ref(pinned),
            None => &[
                Dialect::CountResults,
                Dialect::HeaderTotal,
                Dialect::TotalElements,
            ],
        };
        candidates
            .iter()
            .find_map(|&dialect| self.first_page(dialect, response, body))
    }

    fn first_page(
        &self,
        dialect: Dialect,
        response: &HttpResponse,
        body: &Value,
    ) -> Option<PageState> {
        let (items, total, page_size) = match dialect {
            Dialect::CountResults => {
                let total = as_count(body.get("count")?)?;
                let items = body.get("results")?.as_array()?.clone();
                let size = items.len();
                (items, total, size)
            }
            Dialect::HeaderTotal => {
                let items = body.as_array()?.clone();
                let total = response
                    .header(&self.options.total_header)?
                    .trim()
                    .parse::<usize>()
                    .ok()?;
                let size = items.len();
                (items, total, size)
            }
            Dialect::TotalElements => {
                let total = as_count(body.get("totalElements")?)?;
                let items = body.get("content")?.as_array()?.clone();
                let size = ["numberOfElements", "size"]
                    .iter()
                    .filter_map(|field| body.get(*field).and_then(as_count))
                    .find(|&n| n > 0)
                    .unwrap_or(items.len());
                (items, total, size)
            }
        };
        Some(PageState {
            dialect,
            items,
            total,
            page_size,
            next_page: 2,
        })
    }
}

fn not_found(url: &str) -> Error {
    Error::NotFound {
        method: HttpMethod::Get,
        url: url.to_string(),
    }
}

fn as_count(value: &Value) -> Option<usize> {
    value.as_u64().and_then(|n| usize::try_from(n).ok())
}

fn decode(url: &str, response: &HttpResponse) -> Result<Value> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| Error::Deserialization {
        method: HttpMethod::Get,
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn page_items(dialect: Dialect, url: &str, body: &Value) -> Result<Vec<Value>> {
    let items = match dialect {
        Dialect::CountResults => body.get("results").and_then(Value::as_array),
        Dialect::HeaderTotal => body.as_array(),
        Dialect::TotalElements => body.get("content").and_then(Value::as_array),
    };
    items.cloned().ok_or_else(|| Error::Deserialization {
        method: HttpMethod::Get,
        url: url.to_string(),
        message: format!("page does not match the {dialect:?} collection shape"),
    })
}
