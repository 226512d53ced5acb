//! Canned collaborators for tests. Nothing here touches the network.

use crate::reddit::error::{Error, Result};
use crate::reddit::http::{Fetch, Page};
use crate::reddit::scraper::Listing;
use crate::reddit::unit::{ListingItem, Post};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

pub fn page(url: &str, content_type: &str, body: &[u8]) -> Page {
    Page {
        status: 200,
        content_type: Some(content_type.to_string()),
        final_url: Url::parse(url).unwrap(),
        body: body.to_vec(),
    }
}

pub fn post(id: &str, url: &str) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Post {}", id),
        subreddit: String::from("pics"),
        author: String::from("poster"),
        url: url.to_string(),
        created_utc: 1_600_000_000.0,
        score: 10,
        over_18: false,
        is_self: false,
    }
}

enum Canned {
    Page(Page),
    Fail(String),
}

/// Answers requests from a fixed url table; anything else is a transport failure
#[derive(Default)]
pub struct FakeFetch {
    routes: HashMap<String, Canned>,
    calls: AtomicUsize,
    headers: Mutex<Vec<(String, String)>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `page` for requests to `url`
    pub fn route(mut self, url: &str, page: Page) -> Self {
        self.routes.insert(url.to_string(), Canned::Page(page));
        self
    }

    /// Serves a page whose final url is the requested one
    pub fn serve(self, url: &str, content_type: &str, body: &[u8]) -> Self {
        let p = page(url, content_type, body);
        self.route(url, p)
    }

    /// Serves an HTTP error status
    pub fn status(self, url: &str, status: u16) -> Self {
        let mut p = page(url, "text/html", b"");
        p.status = status;
        self.route(url, p)
    }

    /// Fails requests to `url` the way a timeout would
    pub fn fail(mut self, url: &str, reason: &str) -> Self {
        self.routes
            .insert(url.to_string(), Canned::Fail(reason.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every header sent so far, as (name, value)
    pub fn sent_headers(&self) -> Vec<(String, String)> {
        self.headers.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn get_with(&self, url: &str, headers: &[(&str, String)]) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.headers
            .lock()
            .unwrap()
            .extend(headers.iter().map(|(k, v)| (k.to_string(), v.clone())));

        match self.routes.get(url) {
            Some(Canned::Page(p)) => Ok(p.clone()),
            Some(Canned::Fail(reason)) => Err(Error::transport(url, reason)),
            None => Err(Error::transport(url, "connection refused")),
        }
    }
}

/// A listing over a fixed sequence of items
pub struct VecListing {
    items: VecDeque<ListingItem>,
    fail_from: Option<usize>,
    pub pulls: usize,
    pub unsaved: Mutex<Vec<String>>,
}

impl VecListing {
    pub fn new(items: Vec<ListingItem>) -> Self {
        VecListing {
            items: items.into(),
            fail_from: None,
            pulls: 0,
            unsaved: Mutex::new(Vec::new()),
        }
    }

    /// Makes the `pull`th pull (counting from 1) and every one after it time out
    pub fn failing_from(mut self, pull: usize) -> Self {
        self.fail_from = Some(pull);
        self
    }
}

#[async_trait]
impl Listing for VecListing {
    async fn pull(&mut self, count: usize) -> Result<Vec<ListingItem>> {
        self.pulls += 1;
        if self.fail_from.map_or(false, |n| self.pulls >= n) {
            return Err(Error::transport("https://www.reddit.com/r/pics/hot.json", "timed out"));
        }
        let take = count.min(self.items.len());
        Ok(self.items.drain(..take).collect())
    }

    fn can_unsave(&self) -> bool {
        true
    }

    async fn unsave(&self, post: &Post) -> Result<()> {
        self.unsaved.lock().unwrap().push(post.id.clone());
        Ok(())
    }
}
