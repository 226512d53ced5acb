//! # PaperScraper
//! PaperScraper downloads the images linked by reddit posts.
//!
//! ## Usage
//! 1. Export `REDDIT_USERNAME` and `REDDIT_ACCESS_TOKEN` to read your saved posts,
//!    and optionally `IMGUR_CLIENT_ID` to resolve imgur albums through the API.
//! 2. Run `paperscraper --source saved` or `paperscraper --source r/<name>`.
//! 3. Every processed post is appended to the log file as a line of JSON.
mod reddit;

use reddit::download;
use reddit::error::{Error, Result};
use reddit::file;
use reddit::http::HttpClient;
use reddit::parsers::Registry;
use reddit::scraper::{self, Listing, RedditListing};
use reddit::submission::{SubmissionWrapper, Tally};
use reddit::unit::{self, SortOption, Source};

use std::path::PathBuf;
extern crate clap;
use clap::{App, Arg, ArgMatches};

pub const APP_USER_AGENT: &str = "PaperScraper/0.4.0";
pub const BANNER: &str = " ___                   ___                          \n| _ \\__ _ _ __  ___ _ _/ __| __ _ _ __ _ _ __  ___ _ _ \n|  _/ _` | '_ \\/ -_) '_\\__ \\/ _| '_/ _` | '_ \\/ -_) '_|\n|_| \\__,_| .__/\\___|_| |___/\\__|_| \\__,_| .__/\\___|_|  \n         |_|                            |_|            \n";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Clap command line parser functionality
    let matches = App::new("PaperScraper")
        .version("0.4")
        .about("Downloads the images linked by reddit posts")
        .arg(
            Arg::with_name("source")
                .short("s")
                .long("source")
                .value_name("SOURCE")
                .help("Where to get posts from: saved, or r/<subreddit>")
                .default_value("saved")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("sort")
                .long("sort")
                .value_name("SORT")
                .help("How to sort a subreddit's posts")
                .possible_values(SortOption::NAMES)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("amount")
                .short("n")
                .long("amount")
                .value_name("AMOUNT")
                .help("The amount of posts to download")
                .default_value("10")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("directory")
                .short("d")
                .long("directory")
                .value_name("DIRECTORY")
                .help("The directory to download the files to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log-file")
                .short("l")
                .long("log-file")
                .value_name("FILE")
                .help("The file each processed post is logged to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("score")
                .long("score")
                .value_name("SCORE")
                .help("Ignore posts with less score than this")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("age")
                .long("age")
                .value_name("HOURS")
                .help("Ignore posts older than this many hours")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("title")
                .short("t")
                .long("title")
                .value_name("TEMPLATE")
                .help("Template for file names: %t title, %T Title Case, %s subreddit, %a author")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("organize")
                .short("o")
                .long("organize")
                .help("Sort downloads into one directory per subreddit")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("dry")
                .long("dry")
                .help("Don't unsave anything")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Output more detail during the scraping and downloading process")
                .takes_value(false),
        )
        .get_matches();

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[-] {}", e);
            std::process::exit(1);
        }
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    println!("{}", BANNER);

    if let Err(e) = run(&config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn build_config(matches: &ArgMatches) -> Result<unit::Config> {
    let sort = matches
        .value_of("sort")
        .map(str::parse::<SortOption>)
        .transpose()?;
    let source = Source::parse(matches.value_of("source").unwrap_or("saved"), sort)?;

    let amount = parse_number::<usize>(matches, "amount")?.unwrap_or(10);
    let directory = matches
        .value_of("directory")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("downloads"));

    let mut config = unit::Config::new(source, amount, directory)
        .with_env()
        .with_max_age(parse_number::<i64>(matches, "age")?)?;
    if let Some(log_file) = matches.value_of("log-file") {
        config.log_file = PathBuf::from(log_file);
    }
    config.score = parse_number::<i64>(matches, "score")?;
    config.title = matches.value_of("title").map(String::from);
    config.organize = matches.is_present("organize");
    config.dry = matches.is_present("dry");
    config.verbose = matches.is_present("verbose");
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    matches
        .value_of(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::InvalidArgument(format!("invalid value for {}: {}", name, v)))
        })
        .transpose()
}

/// One fetch, download and report cycle
async fn run(config: &unit::Config) -> Result<()> {
    let http = HttpClient::new()?;
    let registry = Registry::with_defaults(config.imgur_client_id.clone());

    let mut listing = match &config.source {
        Source::Saved => RedditListing::saved(
            http.inner().clone(),
            config.reddit_username.clone(),
            config.reddit_token.clone(),
        )?,
        Source::Subreddit { name, sort } => {
            RedditListing::subreddit(http.inner().clone(), name, *sort)?
        }
    };

    println!("[=] Scraping {}", config.source);
    let score = config.score;
    let age = config.age;
    let batch = scraper::fetch_batch_with(&mut listing, config.amount, &registry, &http, |w| {
        w.has_urls() && w.score_at_least(score) && w.posted_within(age)
    })
    .await?;

    println!("\n[=] Downloading Files");
    let mut tally = Tally::default();
    for (index, mut wrapper) in batch.accepted.into_iter().enumerate() {
        let exception = process(&mut wrapper, config, &http, &listing).await.err();
        tally.add(&wrapper, exception.is_some());
        if let Some(e) = &exception {
            println!("[-] {}: {}", wrapper.title, e);
        }
        if let Err(e) = wrapper.log(&config.log_file, exception.map(|e| e.to_string())) {
            tracing::warn!("couldn't write to {}: {}", config.log_file.display(), e);
        }

        println!("{}", wrapper.summary_string(index + 1));
    }

    for wrapper in batch.rejected.iter().filter(|w| w.error.is_some()) {
        tally.add(wrapper, true);
        println!("[-] Couldn't resolve {}", wrapper.url);
        if let Err(e) = wrapper.log(&config.log_file, None) {
            tracing::warn!("couldn't write to {}: {}", config.log_file.display(), e);
        }
    }

    println!("\n[+] {}", tally);
    if !batch.unrecognized.is_empty() {
        println!("[!] {} post(s) linked to unrecognized hosts:", batch.unrecognized.total());
        for (host, count) in batch.unrecognized.iter() {
            println!("    {} ({})", host, count);
        }
    }
    Ok(())
}

/// Downloads one post's images and unsaves it once every image is on disk
async fn process(
    wrapper: &mut SubmissionWrapper,
    config: &unit::Config,
    http: &HttpClient,
    listing: &dyn Listing,
) -> Result<()> {
    let mut directory = config.directory.clone();
    if config.organize {
        directory.push(file::sanitize(&wrapper.subreddit));
    }

    let title = match &config.title {
        Some(template) => file::sanitize(&wrapper.format(template, '%')?),
        None => wrapper.base_file_title.clone(),
    };

    let downloads = download::download_all_titled(wrapper, &directory, &title, http).await?;
    wrapper.record_downloads(downloads);

    if wrapper.fully_saved() && !config.dry {
        wrapper.unsave(listing, false).await?;
    }
    Ok(())
}
