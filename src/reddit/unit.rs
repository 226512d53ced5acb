use crate::reddit::error::{Error, Result};

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A single reddit submission as it comes out of a listing
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub subreddit: String,
    pub author: String,
    #[serde(default)]
    pub url: String,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub is_self: bool,
}

/// One entry of a listing, decided once when the listing page is decoded
#[derive(Debug, Clone, PartialEq)]
pub enum ListingItem {
    /// A post that links somewhere
    Link(Post),
    /// A self post with no outside link
    Text(Post),
    Comment { id: String },
}

impl ListingItem {
    /// Sorts a decoded post into a link or a self post
    pub fn from_post(post: Post) -> Self {
        if post.is_self || post.url.is_empty() {
            ListingItem::Text(post)
        } else {
            ListingItem::Link(post)
        }
    }
}

/// The ways a subreddit's submissions can be sorted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOption {
    TopAll,
    TopDay,
    TopHour,
    TopWeek,
    TopMonth,
    TopYear,
    New,
    Hot,
    Controversial,
    Gilded,
}

impl SortOption {
    pub const NAMES: &'static [&'static str] = &[
        "top-all",
        "top-day",
        "top-hour",
        "top-week",
        "top-month",
        "top-year",
        "new",
        "hot",
        "controversial",
        "gilded",
    ];

    /// The path segment reddit uses for this sort
    pub fn path(&self) -> &'static str {
        match self {
            SortOption::TopAll
            | SortOption::TopDay
            | SortOption::TopHour
            | SortOption::TopWeek
            | SortOption::TopMonth
            | SortOption::TopYear => "top",
            SortOption::New => "new",
            SortOption::Hot => "hot",
            SortOption::Controversial => "controversial",
            SortOption::Gilded => "gilded",
        }
    }

    /// The `t` query parameter for sorts that take a time window
    pub fn time_filter(&self) -> Option<&'static str> {
        match self {
            SortOption::TopAll => Some("all"),
            SortOption::TopDay => Some("day"),
            SortOption::TopHour => Some("hour"),
            SortOption::TopWeek => Some("week"),
            SortOption::TopMonth => Some("month"),
            SortOption::TopYear => Some("year"),
            _ => None,
        }
    }
}

impl FromStr for SortOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "top" | "top-all" => Ok(SortOption::TopAll),
            "top-day" => Ok(SortOption::TopDay),
            "top-hour" => Ok(SortOption::TopHour),
            "top-week" => Ok(SortOption::TopWeek),
            "top-month" => Ok(SortOption::TopMonth),
            "top-year" => Ok(SortOption::TopYear),
            "new" => Ok(SortOption::New),
            "hot" => Ok(SortOption::Hot),
            "controversial" => Ok(SortOption::Controversial),
            "gilded" => Ok(SortOption::Gilded),
            e => Err(Error::InvalidArgument(format!("unknown sort option: {}", e))),
        }
    }
}

/// Where posts are pulled from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Saved,
    Subreddit { name: String, sort: SortOption },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Saved => write!(f, "saved posts"),
            Source::Subreddit { name, .. } => write!(f, "r/{}", name),
        }
    }
}

impl Source {
    /// Parses `saved` or `r/<name>`
    pub fn parse(source: &str, sort: Option<SortOption>) -> Result<Self> {
        if source == "saved" {
            if sort.is_some() {
                return Err(Error::InvalidArgument(String::from(
                    "saved posts can't be sorted",
                )));
            }
            return Ok(Source::Saved);
        }

        match source.strip_prefix("r/") {
            Some(name) if !name.trim_end_matches('/').is_empty() => Ok(Source::Subreddit {
                name: name.trim_end_matches('/').to_string(),
                sort: sort.unwrap_or(SortOption::Hot),
            }),
            _ => Err(Error::InvalidArgument(format!(
                "expected source to be saved or a subreddit, got {}",
                source
            ))),
        }
    }
}

/// Struct for holding config information so it can be easily passed around
#[derive(Debug, Clone)]
pub struct Config {
    pub source: Source,
    pub amount: usize,
    pub directory: PathBuf,
    pub log_file: PathBuf,
    pub score: Option<i64>,
    pub age: Option<chrono::Duration>,
    pub title: Option<String>,
    pub organize: bool,
    pub dry: bool,
    pub verbose: bool,
    pub imgur_client_id: Option<String>,
    pub reddit_username: Option<String>,
    pub reddit_token: Option<String>,
}

impl Config {
    pub fn new(source: Source, amount: usize, directory: PathBuf) -> Self {
        let log_file = directory.join("log.jsonl");
        Config {
            source,
            amount,
            directory,
            log_file,
            score: None,
            age: None,
            title: None,
            organize: false,
            dry: false,
            verbose: false,
            imgur_client_id: None,
            reddit_username: None,
            reddit_token: None,
        }
    }

    /// Only keeps posts made in the last `hours` hours
    pub fn with_max_age(mut self, hours: Option<i64>) -> Result<Self> {
        self.age = match hours {
            Some(h) => Some(chrono::Duration::try_hours(h).ok_or_else(|| {
                Error::InvalidArgument(format!("age of {} hours is out of range", h))
            })?),
            None => None,
        };
        Ok(self)
    }

    /// Reads the secrets that never go on the command line
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        self.imgur_client_id = var("IMGUR_CLIENT_ID");
        self.reddit_username = var("REDDIT_USERNAME");
        self.reddit_token = var("REDDIT_ACCESS_TOKEN");
        self
    }
}
