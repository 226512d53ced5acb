use crate::reddit::error::{Error, Result};
use crate::reddit::file;
use crate::reddit::http::Fetch;
use crate::reddit::parsers::{Registry, Resolution, UrlSet};
use crate::reddit::scraper::Listing;
use crate::reddit::unit::Post;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Url to the file it was saved to, or `None` if the download failed
pub type Downloads = BTreeMap<String, Option<PathBuf>>;

/// Wraps a post with everything learned while resolving and downloading it
#[derive(Debug, Clone)]
pub struct SubmissionWrapper {
    post: Post,

    pub title: String,
    pub subreddit: String,
    pub url: String,
    pub author: String,
    pub nsfw: bool,
    pub score: i64,
    pub time_created: DateTime<Utc>,

    pub base_file_title: String,
    pub urls: UrlSet,
    pub can_unsave: bool,
    /// Why resolving this post's url failed, if it did
    pub error: Option<String>,
    pub downloads: Option<Downloads>,

    resolved: bool,
}

/// What the log file gets for each post
#[derive(Serialize, Debug, PartialEq)]
pub struct LogRecord {
    pub title: String,
    pub id: String,
    pub url: String,
    pub recognized_urls: RecognizedUrls,
    pub exception: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum RecognizedUrls {
    Found(UrlSet),
    Downloaded(BTreeMap<String, Option<String>>),
}

impl SubmissionWrapper {
    pub fn new(post: Post, can_unsave: bool) -> Self {
        let time_created = DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0)
            .unwrap_or_default();

        SubmissionWrapper {
            title: post.title.clone(),
            subreddit: post.subreddit.clone(),
            url: post.url.clone(),
            author: post.author.clone(),
            nsfw: post.over_18,
            score: post.score,
            time_created,
            base_file_title: file::sanitize(&post.title),
            urls: UrlSet::new(),
            can_unsave,
            error: None,
            downloads: None,
            resolved: false,
            post,
        }
    }

    pub fn id(&self) -> &str {
        &self.post.id
    }

    /// Resolves this post's link into direct image urls.
    ///
    /// Only the first call does anything. Returns the host if no parser
    /// recognized the linked page. A failure leaves `urls` empty and is kept
    /// in `error`.
    pub async fn find_urls(&mut self, registry: &Registry, fetch: &dyn Fetch) -> Option<String> {
        if self.resolved {
            return None;
        }
        self.resolved = true;

        match registry.resolve(&self.url, fetch).await {
            Ok(Resolution::Found { urls, .. }) => {
                self.urls = urls;
                None
            }
            Ok(Resolution::Unrecognized { host }) => Some(host),
            Err(e) => {
                tracing::warn!("couldn't resolve {}: {}", self.url, e);
                self.error = Some(e.to_string());
                None
            }
        }
    }

    pub fn has_urls(&self) -> bool {
        !self.urls.is_empty()
    }

    /// True if this post has at least as much score as the given minimum
    pub fn score_at_least(&self, minimum: Option<i64>) -> bool {
        minimum.map_or(true, |min| self.score >= min)
    }

    /// True if this post is no older than `max_age`
    pub fn posted_within(&self, max_age: Option<chrono::Duration>) -> bool {
        max_age.map_or(true, |age| Utc::now() - self.time_created <= age)
    }

    pub fn record_downloads(&mut self, downloads: Downloads) {
        self.downloads = Some(downloads);
    }

    /// Number of urls that were saved to disk
    pub fn count_saved(&self) -> usize {
        self.downloads
            .as_ref()
            .map_or(0, |d| d.values().filter(|path| path.is_some()).count())
    }

    /// True if urls were found and every one of them was saved
    pub fn fully_saved(&self) -> bool {
        self.has_urls() && self.count_saved() == self.urls.len()
    }

    pub fn log_record(&self, exception: Option<String>) -> LogRecord {
        let recognized_urls = match &self.downloads {
            Some(downloads) => RecognizedUrls::Downloaded(
                downloads
                    .iter()
                    .map(|(url, path)| {
                        (url.clone(), path.as_ref().map(|p| p.display().to_string()))
                    })
                    .collect(),
            ),
            None => RecognizedUrls::Found(self.urls.clone()),
        };

        LogRecord {
            title: self.post.title.clone(),
            id: self.post.id.clone(),
            url: self.post.url.clone(),
            recognized_urls,
            exception: exception.or_else(|| self.error.clone()),
        }
    }

    /// Appends this post's log record to `path`
    pub fn log(&self, path: &Path, exception: Option<String>) -> Result<()> {
        file::append_log(path, &self.log_record(exception))?;
        Ok(())
    }

    /// Unsaves this post if it may be unsaved, or if `force` is set.
    /// Returns whether it was unsaved.
    pub async fn unsave(&self, listing: &dyn Listing, force: bool) -> Result<bool> {
        if !(force || self.can_unsave) {
            return Ok(false);
        }
        listing.unsave(&self.post).await?;
        Ok(true)
    }

    /// Formats a string based on the given template.
    ///
    /// Specifiers, each prefixed with `token`:
    /// `t` title, `T` title in Title Case, `s` subreddit, `a` author,
    /// `u` url, `p` number of saved files, `f` number of found urls,
    /// and the token itself for a literal token.
    pub fn format(&self, template: &str, token: char) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut specifier = false;

        for (i, c) in template.chars().enumerate() {
            if !specifier {
                if c == token {
                    specifier = true;
                } else {
                    out.push(c);
                }
                continue;
            }

            specifier = false;
            match c {
                't' => out.push_str(&self.title),
                'T' => out.push_str(&file::title_case(&self.title)),
                's' => out.push_str(&self.subreddit),
                'a' => out.push_str(&self.author),
                'u' => out.push_str(&self.url),
                'p' => out.push_str(&self.count_saved().to_string()),
                'f' => out.push_str(&self.urls.len().to_string()),
                c if c == token => out.push(token),
                c => {
                    return Err(Error::Template(format!(
                        "unknown specifier {}{} at {} in {:?}",
                        token, c, i, template
                    )))
                }
            }
        }

        if specifier {
            return Err(Error::Template(format!("trailing {} in {:?}", token, template)));
        }
        Ok(out)
    }

    pub fn summary_string(&self, index: usize) -> String {
        format!(
            "({}) {}\n   r/{}\n   {}\n   Saved {} / {} image(s).",
            index,
            self.title,
            self.subreddit,
            self.url,
            self.count_saved(),
            self.urls.len()
        )
    }
}

/// Running totals for the report printed after a run
#[derive(Debug, Default, PartialEq)]
pub struct Tally {
    pub saved: usize,
    pub found: usize,
    pub failed: usize,
}

impl Tally {
    /// Counts a post's images. A post fails if it had an error or lost a download.
    pub fn add(&mut self, wrapper: &SubmissionWrapper, error: bool) {
        self.saved += wrapper.count_saved();
        self.found += wrapper.urls.len();
        if error || wrapper.error.is_some() || wrapper.count_saved() < wrapper.urls.len() {
            self.failed += 1;
        }
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Saved {} / {} image(s)", self.saved, self.found)?;
        if self.failed > 0 {
            write!(f, ", {} post(s) failed", self.failed)?;
        }
        Ok(())
    }
}
