use crate::reddit::error::{Error, Result};
use crate::reddit::file::path_extension;
use crate::reddit::http::{Fetch, Page};

use async_trait::async_trait;
use futures::future::join_all;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// Direct image links resolved from one page
pub type UrlSet = BTreeSet<String>;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];
const IMAGE_MIMES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif"];

const IMGUR_API: &str = "https://api.imgur.com/3";

/// Recognizes one shape of web page and pulls the direct image links out of it
#[async_trait]
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if this parser knows how to handle `page`
    fn recognizes(&self, page: &Page) -> bool;

    /// Only called on pages this parser recognizes
    async fn parse(&self, page: &Page, fetch: &dyn Fetch) -> Result<UrlSet>;
}

/// What came of resolving one link
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found { parser: &'static str, urls: UrlSet },
    Unrecognized { host: String },
}

impl Resolution {
    pub fn urls(&self) -> UrlSet {
        match self {
            Resolution::Found { urls, .. } => urls.clone(),
            Resolution::Unrecognized { .. } => UrlSet::new(),
        }
    }
}

/// An ordered list of parsers; the first one that recognizes a page wins
pub struct Registry {
    parsers: Vec<Box<dyn Parser>>,
}

impl Registry {
    pub fn new(parsers: Vec<Box<dyn Parser>>) -> Self {
        Registry { parsers }
    }

    /// Direct images first, then imgur, then the hosts that aren't supported yet
    pub fn with_defaults(imgur_client_id: Option<String>) -> Self {
        let album = ImgurAlbumParser::new(imgur_client_id);
        let parsers: Vec<Box<dyn Parser>> = vec![
            Box::new(SingleImageParser),
            Box::new(album.clone()),
            Box::new(ImgurGalleryParser::new(album)),
            Box::new(ImgurSingleParser),
            Box::new(FlickrParser),
            Box::new(GfycatParser),
        ];
        Registry::new(parsers)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn select(&self, page: &Page) -> Option<&dyn Parser> {
        self.parsers
            .iter()
            .find(|p| p.recognizes(page))
            .map(|p| &**p)
    }

    /// Fetches `url` and resolves it into direct image links
    pub async fn resolve(&self, url: &str, fetch: &dyn Fetch) -> Result<Resolution> {
        let page = fetch.get(url).await?.ensure_success()?;

        match self.select(&page) {
            Some(parser) => {
                let urls = parser.parse(&page, fetch).await?;
                tracing::debug!("{} resolved {} to {} url(s)", parser.name(), url, urls.len());
                Ok(Resolution::Found {
                    parser: parser.name(),
                    urls,
                })
            }
            None => {
                let host = page.final_url.host_str().unwrap_or("<unknown>").to_string();
                tracing::debug!("no parser recognizes {} ({})", url, host);
                Ok(Resolution::Unrecognized { host })
            }
        }
    }
}

/// How often each host went unrecognized during a run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UnrecognizedHosts(BTreeMap<String, usize>);

impl UnrecognizedHosts {
    pub fn record(&mut self, host: &str) {
        *self.0.entry(host.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: UnrecognizedHosts) {
        for (host, count) in other.0 {
            *self.0.entry(host).or_insert(0) += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(host, count)| (host.as_str(), *count))
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Direct links to png, jpg and gif files
#[derive(Debug, Clone, Copy)]
pub struct SingleImageParser;

#[async_trait]
impl Parser for SingleImageParser {
    fn name(&self) -> &'static str {
        "single-image"
    }

    fn recognizes(&self, page: &Page) -> bool {
        // matches i.imgur.com, i.redd.it, artstation and other direct links
        let by_mime = page
            .mime()
            .map_or(false, |mime| IMAGE_MIMES.contains(&mime.as_str()));
        let by_extension = path_extension(&page.final_url)
            .map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        by_mime || by_extension
    }

    async fn parse(&self, page: &Page, _fetch: &dyn Fetch) -> Result<UrlSet> {
        Ok(std::iter::once(page.final_url.to_string()).collect())
    }
}

#[derive(Deserialize, Debug)]
struct ImgurImages {
    data: Vec<ImgurImage>,
}

#[derive(Deserialize, Debug)]
struct ImgurImage {
    link: String,
}

/// imgur albums, `imgur.com/a/<id>`
#[derive(Debug, Clone, Default)]
pub struct ImgurAlbumParser {
    client_id: Option<String>,
}

impl ImgurAlbumParser {
    pub fn new(client_id: Option<String>) -> Self {
        ImgurAlbumParser { client_id }
    }

    async fn from_api(&self, client_id: &str, album_id: &str, fetch: &dyn Fetch) -> Result<UrlSet> {
        let url = format!("{}/album/{}/images", IMGUR_API, album_id);
        let headers = [("Authorization", format!("Client-ID {}", client_id))];
        let images: ImgurImages = fetch.get_with(&url, &headers).await?.ensure_success()?.json()?;
        Ok(images.data.into_iter().map(|image| image.link).collect())
    }

    async fn from_page(&self, page: &Page, fetch: &dyn Fetch) -> Result<UrlSet> {
        let members = album_members(&page.text());
        tracing::debug!("album {} has {} member(s)", page.final_url, members.len());

        let resolved = join_all(
            members
                .iter()
                .map(|id| resolve_member(format!("https://imgur.com/{}", id), fetch)),
        )
        .await;

        let mut urls = UrlSet::new();
        for member in resolved {
            urls.extend(member?);
        }
        Ok(urls)
    }
}

#[async_trait]
impl Parser for ImgurAlbumParser {
    fn name(&self) -> &'static str {
        "imgur-album"
    }

    fn recognizes(&self, page: &Page) -> bool {
        is_imgur(&page.final_url) && imgur_id(&page.final_url, "a").is_some()
    }

    async fn parse(&self, page: &Page, fetch: &dyn Fetch) -> Result<UrlSet> {
        match (&self.client_id, imgur_id(&page.final_url, "a")) {
            (Some(client_id), Some(album_id)) => self.from_api(client_id, &album_id, fetch).await,
            _ => self.from_page(page, fetch).await,
        }
    }
}

#[derive(Deserialize, Debug)]
struct GalleryMeta {
    data: GalleryData,
}

#[derive(Deserialize, Debug)]
struct GalleryData {
    image: Option<GalleryImage>,
}

#[derive(Deserialize, Debug)]
struct GalleryImage {
    #[serde(default)]
    is_album: bool,
    hash: Option<String>,
    ext: Option<String>,
}

/// imgur galleries, which are backed by either an album or a single image
#[derive(Debug, Clone, Default)]
pub struct ImgurGalleryParser {
    album: ImgurAlbumParser,
}

impl ImgurGalleryParser {
    pub fn new(album: ImgurAlbumParser) -> Self {
        ImgurGalleryParser { album }
    }
}

#[async_trait]
impl Parser for ImgurGalleryParser {
    fn name(&self) -> &'static str {
        "imgur-gallery"
    }

    fn recognizes(&self, page: &Page) -> bool {
        is_imgur(&page.final_url) && imgur_id(&page.final_url, "gallery").is_some()
    }

    async fn parse(&self, page: &Page, fetch: &dyn Fetch) -> Result<UrlSet> {
        let unsupported = |shape: &str| Error::UnsupportedShape {
            url: page.final_url.to_string(),
            shape: shape.to_string(),
        };
        let gallery_id =
            imgur_id(&page.final_url, "gallery").ok_or_else(|| unsupported("gallery"))?;

        let mut meta_url = page.final_url.clone();
        meta_url.set_query(None);
        meta_url.set_fragment(None);
        let meta_url = format!("{}.json", meta_url.as_str().trim_end_matches('/'));

        let meta: GalleryMeta = fetch.get(&meta_url).await?.ensure_success()?.json()?;

        match meta.data.image {
            Some(GalleryImage { is_album: true, .. }) => {
                let album_url = format!("https://imgur.com/a/{}", gallery_id);
                let album_page = fetch.get(&album_url).await?.ensure_success()?;
                self.album.parse(&album_page, fetch).await
            }
            Some(GalleryImage {
                hash: Some(hash),
                ext: Some(ext),
                ..
            }) => {
                let image_url = format!("https://i.imgur.com/{}{}", hash, ext);
                let image_page = fetch.get(&image_url).await?.ensure_success()?;
                if !SingleImageParser.recognizes(&image_page) {
                    return Err(unsupported("single-image gallery"));
                }
                SingleImageParser.parse(&image_page, fetch).await
            }
            _ => Err(unsupported("gallery")),
        }
    }
}

/// imgur pages that show a single image
#[derive(Debug, Clone, Copy)]
pub struct ImgurSingleParser;

#[async_trait]
impl Parser for ImgurSingleParser {
    fn name(&self) -> &'static str {
        "imgur-single"
    }

    fn recognizes(&self, page: &Page) -> bool {
        is_imgur(&page.final_url)
            && imgur_id(&page.final_url, "a").is_none()
            && imgur_id(&page.final_url, "gallery").is_none()
    }

    async fn parse(&self, page: &Page, _fetch: &dyn Fetch) -> Result<UrlSet> {
        Ok(single_image_link(&page.text()).into_iter().collect())
    }
}

/// Not supported yet
#[derive(Debug, Clone, Copy)]
pub struct FlickrParser;

#[async_trait]
impl Parser for FlickrParser {
    fn name(&self) -> &'static str {
        "flickr"
    }

    fn recognizes(&self, page: &Page) -> bool {
        host_is(&page.final_url, "flickr.com") || host_is(&page.final_url, "flic.kr")
    }

    async fn parse(&self, _page: &Page, _fetch: &dyn Fetch) -> Result<UrlSet> {
        Ok(UrlSet::new())
    }
}

/// Not supported yet
#[derive(Debug, Clone, Copy)]
pub struct GfycatParser;

#[async_trait]
impl Parser for GfycatParser {
    fn name(&self) -> &'static str {
        "gfycat"
    }

    fn recognizes(&self, page: &Page) -> bool {
        host_is(&page.final_url, "gfycat.com")
    }

    async fn parse(&self, _page: &Page, _fetch: &dyn Fetch) -> Result<UrlSet> {
        Ok(UrlSet::new())
    }
}

/// Resolves one album member page, which may redirect straight to the image
async fn resolve_member(url: String, fetch: &dyn Fetch) -> Result<UrlSet> {
    let page = fetch.get(&url).await?.ensure_success()?;
    if SingleImageParser.recognizes(&page) {
        SingleImageParser.parse(&page, fetch).await
    } else {
        ImgurSingleParser.parse(&page, fetch).await
    }
}

fn host_is(url: &Url, domain: &str) -> bool {
    url.host_str().map_or(false, |host| {
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}

fn is_imgur(url: &Url) -> bool {
    host_is(url, "imgur.com")
}

/// The id in `/<kind>/<id>` or `/<kind>/<some-title>-<id>`
fn imgur_id(url: &Url, kind: &str) -> Option<String> {
    let mut segments = url.path_segments()?;
    if segments.next()? != kind {
        return None;
    }
    let slug = segments.next().filter(|s| !s.is_empty())?;
    slug.rsplit('-').next().map(String::from)
}

fn select_attr(html: &str, selector: &str, attr: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(String::from)
        .collect()
}

fn album_members(html: &str) -> Vec<String> {
    select_attr(html, "div.post-images > div[id]", "id")
}

fn single_image_link(html: &str) -> Option<String> {
    select_attr(html, "link[rel=image_src]", "href")
        .into_iter()
        .chain(select_attr(html, "meta[property=\"og:image\"]", "content"))
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::testing::{page, FakeFetch};

    fn album_html(ids: &[&str]) -> Vec<u8> {
        let members: String = ids
            .iter()
            .map(|id| format!("<div id=\"{}\"><img></div>", id))
            .collect();
        format!(
            "<html><body><div class=\"post-images\">{}</div></body></html>",
            members
        )
        .into_bytes()
    }

    fn single_html(href: &str) -> Vec<u8> {
        format!(
            "<html><head><link rel=\"image_src\" href=\"{}\"></head><body></body></html>",
            href
        )
        .into_bytes()
    }

    fn found(parser: &'static str, urls: &[&str]) -> Resolution {
        Resolution::Found {
            parser,
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn png_link_is_a_single_image() {
        let url = "https://i.redd.it/abc.png?width=640";
        let fetch = FakeFetch::new().serve(url, "application/octet-stream", b"\x89PNG");
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve(url, &fetch).await.unwrap();
        assert_eq!(resolution, found("single-image", &[url]));
    }

    #[tokio::test]
    async fn image_content_type_is_a_single_image() {
        let url = "https://cdn.example.com/render";
        let fetch = FakeFetch::new().serve(url, "image/jpeg", b"");
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve(url, &fetch).await.unwrap();
        assert_eq!(resolution, found("single-image", &[url]));
    }

    #[tokio::test]
    async fn redirected_image_resolves_to_final_url() {
        let fetch = FakeFetch::new().route(
            "https://imgur.com/abc",
            page("https://i.imgur.com/abc.jpg", "image/jpeg", b""),
        );
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve("https://imgur.com/abc", &fetch).await.unwrap();
        assert_eq!(resolution, found("single-image", &["https://i.imgur.com/abc.jpg"]));
    }

    #[tokio::test]
    async fn unknown_page_reports_its_host() {
        let url = "https://www.example.com/blog/post";
        let fetch = FakeFetch::new().serve(url, "text/html", b"<html></html>");
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve(url, &fetch).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Unrecognized {
                host: String::from("www.example.com")
            }
        );
        assert!(resolution.urls().is_empty());
    }

    #[tokio::test]
    async fn album_members_are_resolved_and_merged() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/a/xyz", "text/html", &album_html(&["one", "two"]))
            .route(
                "https://imgur.com/one",
                page("https://i.imgur.com/one.png", "image/png", b""),
            )
            .serve(
                "https://imgur.com/two",
                "text/html",
                &single_html("https://i.imgur.com/two.jpg"),
            );
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve("https://imgur.com/a/xyz", &fetch).await.unwrap();
        assert_eq!(
            resolution,
            found(
                "imgur-album",
                &["https://i.imgur.com/one.png", "https://i.imgur.com/two.jpg"]
            )
        );
    }

    #[tokio::test]
    async fn album_uses_the_api_when_a_client_id_is_set() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/a/xyz", "text/html", b"")
            .serve(
                "https://api.imgur.com/3/album/xyz/images",
                "application/json",
                br#"{"data": [{"link": "https://i.imgur.com/1.png"}, {"link": "https://i.imgur.com/2.gif"}]}"#,
            );
        let registry = Registry::with_defaults(Some(String::from("cid")));

        let resolution = registry.resolve("https://imgur.com/a/xyz", &fetch).await.unwrap();
        assert_eq!(
            resolution,
            found(
                "imgur-album",
                &["https://i.imgur.com/1.png", "https://i.imgur.com/2.gif"]
            )
        );
        assert!(fetch
            .sent_headers()
            .contains(&(String::from("Authorization"), String::from("Client-ID cid"))));
    }

    #[tokio::test]
    async fn failing_album_member_fails_the_album() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/a/xyz", "text/html", &album_html(&["one", "two"]))
            .route(
                "https://imgur.com/one",
                page("https://i.imgur.com/one.png", "image/png", b""),
            )
            .fail("https://imgur.com/two", "timed out");
        let registry = Registry::with_defaults(None);

        let err = registry.resolve("https://imgur.com/a/xyz", &fetch).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn album_gallery_delegates_to_the_album() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/gallery/xyz", "text/html", b"")
            .serve(
                "https://imgur.com/gallery/xyz.json",
                "application/json",
                br#"{"data": {"image": {"is_album": true}}}"#,
            )
            .serve("https://imgur.com/a/xyz", "text/html", &album_html(&["one"]))
            .route(
                "https://imgur.com/one",
                page("https://i.imgur.com/one.png", "image/png", b""),
            );
        let registry = Registry::with_defaults(None);

        let resolution = registry
            .resolve("https://imgur.com/gallery/xyz", &fetch)
            .await
            .unwrap();
        assert_eq!(resolution, found("imgur-gallery", &["https://i.imgur.com/one.png"]));
    }

    #[tokio::test]
    async fn single_image_gallery_delegates_to_the_image() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/gallery/a-title-xyz", "text/html", b"")
            .serve(
                "https://imgur.com/gallery/a-title-xyz.json",
                "application/json",
                br#"{"data": {"image": {"is_album": false, "hash": "Hq3", "ext": ".gif"}}}"#,
            )
            .serve("https://i.imgur.com/Hq3.gif", "image/gif", b"GIF89a");
        let registry = Registry::with_defaults(None);

        let resolution = registry
            .resolve("https://imgur.com/gallery/a-title-xyz", &fetch)
            .await
            .unwrap();
        assert_eq!(resolution, found("imgur-gallery", &["https://i.imgur.com/Hq3.gif"]));
    }

    #[tokio::test]
    async fn gallery_of_unknown_shape_is_unsupported() {
        let fetch = FakeFetch::new()
            .serve("https://imgur.com/gallery/xyz", "text/html", b"")
            .serve(
                "https://imgur.com/gallery/xyz.json",
                "application/json",
                br#"{"data": {"image": {"is_album": false}}}"#,
            );
        let registry = Registry::with_defaults(None);

        let err = registry
            .resolve("https://imgur.com/gallery/xyz", &fetch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }

    #[tokio::test]
    async fn stub_hosts_resolve_to_nothing_without_more_requests() {
        let url = "https://www.flickr.com/photos/someone/123/";
        let fetch = FakeFetch::new().serve(url, "text/html", b"<html></html>");
        let registry = Registry::with_defaults(None);

        let resolution = registry.resolve(url, &fetch).await.unwrap();
        assert_eq!(resolution, found("flickr", &[]));
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn failures_propagate() {
        let fetch = FakeFetch::new()
            .fail("https://i.redd.it/slow.png", "timed out")
            .status("https://i.redd.it/gone.png", 404);
        let registry = Registry::with_defaults(None);

        let slow = registry.resolve("https://i.redd.it/slow.png", &fetch).await;
        assert!(matches!(slow, Err(Error::Transport { .. })));
        let gone = registry.resolve("https://i.redd.it/gone.png", &fetch).await;
        assert!(matches!(gone, Err(Error::Http { status: 404, .. })));
    }

    #[tokio::test]
    async fn dispatch_is_deterministic() {
        let url = "https://imgur.com/a/xyz";
        let fetch = FakeFetch::new()
            .serve(url, "text/html", &album_html(&["b", "a"]))
            .route("https://imgur.com/a", page("https://i.imgur.com/a.png", "image/png", b""))
            .route("https://imgur.com/b", page("https://i.imgur.com/b.png", "image/png", b""));
        let registry = Registry::with_defaults(None);

        let first = registry.resolve(url, &fetch).await.unwrap();
        let second = registry.resolve(url, &fetch).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn default_order() {
        assert_eq!(
            Registry::with_defaults(None).names(),
            vec![
                "single-image",
                "imgur-album",
                "imgur-gallery",
                "imgur-single",
                "flickr",
                "gfycat"
            ]
        );
    }

    #[test]
    fn imgur_ids_from_paths() {
        let url = Url::parse("https://imgur.com/gallery/cute-cat-AbC12").unwrap();
        assert_eq!(imgur_id(&url, "gallery").as_deref(), Some("AbC12"));
        assert_eq!(imgur_id(&url, "a"), None);
        let bare = Url::parse("https://imgur.com/a/").unwrap();
        assert_eq!(imgur_id(&bare, "a"), None);
    }

    #[test]
    fn unrecognized_hosts_merge() {
        let mut total = UnrecognizedHosts::default();
        let mut round = UnrecognizedHosts::default();
        round.record("example.com");
        round.record("example.com");
        round.record("youtube.com");
        total.merge(round.clone());
        total.merge(round);

        assert_eq!(total.total(), 6);
        assert_eq!(
            total.iter().collect::<Vec<_>>(),
            vec![("example.com", 4), ("youtube.com", 2)]
        );
    }
}
