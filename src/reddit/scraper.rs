use crate::reddit::error::{Error, Result};
use crate::reddit::http::Fetch;
use crate::reddit::parsers::{Registry, UnrecognizedHosts};
use crate::reddit::submission::SubmissionWrapper;
use crate::reddit::unit::{ListingItem, Post, SortOption};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

/// The most items reddit hands out per listing page
const PAGE_LIMIT: usize = 100;

/// A lazy, possibly finite sequence of listing items
#[async_trait]
pub trait Listing: Send + Sync {
    /// Pulls up to `count` more items. Fewer than `count` means the listing ran out.
    async fn pull(&mut self, count: usize) -> Result<Vec<ListingItem>>;

    /// Whether posts from this listing can be unsaved
    fn can_unsave(&self) -> bool;

    async fn unsave(&self, post: &Post) -> Result<()>;
}

/// Struct used for deserializing listing pages
#[derive(Deserialize, Debug)]
struct ListingPayload {
    data: ListingData,
}

#[derive(Deserialize, Debug)]
struct ListingData {
    after: Option<String>,
    children: Vec<Thing>,
}

#[derive(Deserialize, Debug)]
struct Thing {
    kind: String,
    data: Value,
}

impl Thing {
    fn into_item(self) -> Result<Option<ListingItem>> {
        match self.kind.as_str() {
            "t3" => Ok(Some(ListingItem::from_post(serde_json::from_value(self.data)?))),
            "t1" => Ok(Some(ListingItem::Comment {
                id: self.data["id"].as_str().unwrap_or_default().to_string(),
            })),
            _ => Ok(None),
        }
    }
}

/// Items a page's children decode into. A child that doesn't decode is skipped.
fn decode_children(children: Vec<Thing>) -> Vec<ListingItem> {
    children
        .into_iter()
        .filter_map(|thing| match thing.into_item() {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("skipping undecodable listing item: {}", e);
                None
            }
        })
        .collect()
}

/// A reddit listing walked page by page through its `after` cursor
pub struct RedditListing {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    buffer: VecDeque<ListingItem>,
    after: Option<String>,
    done: bool,
}

impl RedditListing {
    /// A subreddit's posts, which need no authentication
    pub fn subreddit(client: reqwest::Client, name: &str, sort: SortOption) -> Result<Self> {
        let mut base = Url::parse(&format!(
            "https://www.reddit.com/r/{}/{}.json",
            urlencoding::encode(name),
            sort.path()
        ))?;
        if let Some(t) = sort.time_filter() {
            base.query_pairs_mut().append_pair("t", t);
        }

        Ok(RedditListing::new(client, base, None))
    }

    /// A user's saved posts, read with an already issued OAuth token
    pub fn saved(
        client: reqwest::Client,
        username: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        let (username, token) = match (username, token) {
            (Some(username), Some(token)) => (username, token),
            _ => {
                return Err(Error::Authentication(String::from(
                    "REDDIT_USERNAME and REDDIT_ACCESS_TOKEN must be set to read saved posts",
                )))
            }
        };

        let base = Url::parse(&format!(
            "https://oauth.reddit.com/user/{}/saved.json",
            urlencoding::encode(&username)
        ))?;

        Ok(RedditListing::new(client, base, Some(token)))
    }

    fn new(client: reqwest::Client, base: Url, token: Option<String>) -> Self {
        RedditListing {
            client,
            base,
            token,
            buffer: VecDeque::new(),
            after: None,
            done: false,
        }
    }

    fn page_url(&self) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &PAGE_LIMIT.to_string());
            query.append_pair("raw_json", "1");
            if let Some(after) = &self.after {
                query.append_pair("after", after);
            }
        }
        url
    }

    async fn next_page(&mut self) -> Result<()> {
        let url = self.page_url();
        tracing::debug!("fetching listing page {}", url);

        let mut request = self.client.get(url.as_str());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Authentication(format!("reddit answered {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;
        let payload: ListingPayload = serde_json::from_slice(&body)?;

        let received = payload.data.children.len();
        self.buffer.extend(decode_children(payload.data.children));

        self.after = payload.data.after;
        if self.after.is_none() || received == 0 {
            self.done = true;
        }
        Ok(())
    }
}

#[async_trait]
impl Listing for RedditListing {
    async fn pull(&mut self, count: usize) -> Result<Vec<ListingItem>> {
        while self.buffer.len() < count && !self.done {
            self.next_page().await?;
        }
        let take = count.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    fn can_unsave(&self) -> bool {
        self.token.is_some()
    }

    async fn unsave(&self, post: &Post) -> Result<()> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::Authentication(String::from("unsaving needs a token")))?;
        let url = "https://oauth.reddit.com/api/unsave";

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .form(&[("id", format!("t3_{}", post.id))])
            .send()
            .await
            .map_err(|e| Error::transport(url, e))?;

        if !response.status().is_success() {
            return Err(Error::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// One fetched batch
#[derive(Debug, Default)]
pub struct Batch {
    /// Posts meeting the criteria, in listing order
    pub accepted: Vec<SubmissionWrapper>,
    /// Link posts that were resolved but didn't meet the criteria
    pub rejected: Vec<SubmissionWrapper>,
    pub unrecognized: UnrecognizedHosts,
}

/// Fetches up to `amount` posts that resolved to at least one image
pub async fn fetch_batch(
    listing: &mut dyn Listing,
    amount: usize,
    registry: &Registry,
    fetch: &dyn Fetch,
) -> Result<Batch> {
    fetch_batch_with(listing, amount, registry, fetch, SubmissionWrapper::has_urls).await
}

/// Fetches up to `amount` posts satisfying `criteria`.
///
/// Pulls twice as many posts as requested each round until enough pass or the
/// listing runs dry. A short batch is not an error. Only a failure on the
/// first pull is returned; a later one ends the batch with what it has.
pub async fn fetch_batch_with<F>(
    listing: &mut dyn Listing,
    amount: usize,
    registry: &Registry,
    fetch: &dyn Fetch,
    criteria: F,
) -> Result<Batch>
where
    F: Fn(&SubmissionWrapper) -> bool,
{
    if amount == 0 {
        return Err(Error::InvalidArgument(String::from(
            "amount must be a positive integer",
        )));
    }

    let try_amount = 2 * amount;
    let can_unsave = listing.can_unsave();
    let mut batch = Batch::default();

    for round in 0.. {
        let (items, exhausted) = match listing.pull(try_amount).await {
            Ok(items) => {
                let exhausted = items.len() < try_amount;
                (items, exhausted)
            }
            Err(e) if round > 0 => {
                tracing::warn!("listing failed after {} round(s): {}", round, e);
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };

        let mut wrappers: Vec<SubmissionWrapper> = items
            .into_iter()
            .filter_map(|item| match item {
                ListingItem::Link(post) => Some(SubmissionWrapper::new(post, can_unsave)),
                ListingItem::Text(post) => {
                    tracing::debug!("skipping self post {}", post.id);
                    None
                }
                ListingItem::Comment { id } => {
                    tracing::debug!("skipping comment {}", id);
                    None
                }
            })
            .collect();

        let hosts = join_all(wrappers.iter_mut().map(|w| w.find_urls(registry, fetch))).await;
        for host in hosts.into_iter().flatten() {
            batch.unrecognized.record(&host);
        }

        for wrapper in wrappers {
            if criteria(&wrapper) {
                batch.accepted.push(wrapper);
            } else {
                batch.rejected.push(wrapper);
            }
        }

        tracing::info!(
            "{} of {} post(s) collected{}",
            batch.accepted.len().min(amount),
            amount,
            if exhausted { ", listing exhausted" } else { "" }
        );

        if exhausted || batch.accepted.len() >= amount {
            break;
        }
    }

    batch.accepted.truncate(amount);
    Ok(batch)
}
