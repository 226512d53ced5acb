use crate::reddit::error::Result;
use crate::reddit::file;
use crate::reddit::http::{Fetch, Page};
use crate::reddit::submission::{Downloads, SubmissionWrapper};

use futures::future::join_all;
use std::path::Path;

/// Downloads every url of `wrapper` into `directory`, named after its title
pub async fn download_all(
    wrapper: &SubmissionWrapper,
    directory: &Path,
    fetch: &dyn Fetch,
) -> Result<Downloads> {
    download_all_titled(wrapper, directory, &wrapper.base_file_title, fetch).await
}

/// Downloads every url of `wrapper` into `directory`.
///
/// The files are fetched concurrently, then written one at a time in url
/// order, so each one sees the names taken before it. The second and later
/// urls are named `title (i)`. A url that fails maps to `None`; the others
/// carry on. The result always has exactly one entry per url.
pub async fn download_all_titled(
    wrapper: &SubmissionWrapper,
    directory: &Path,
    title: &str,
    fetch: &dyn Fetch,
) -> Result<Downloads> {
    let mut downloads = Downloads::new();
    if wrapper.urls.is_empty() {
        return Ok(downloads);
    }

    tokio::fs::create_dir_all(directory).await?;

    let pages = join_all(wrapper.urls.iter().map(|url| fetch.get(url))).await;

    for (i, (url, page)) in wrapper.urls.iter().zip(pages).enumerate() {
        let page = match page.and_then(Page::ensure_success) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("couldn't download {}: {}", url, e);
                downloads.insert(url.clone(), None);
                continue;
            }
        };

        let name = if i == 0 {
            title.to_string()
        } else {
            format!("{} ({})", title, i)
        };
        let path = match save(&page, directory, &name).await {
            Ok(name) => Some(directory.join(name)),
            Err(e) => {
                tracing::warn!("couldn't save {}: {}", url, e);
                None
            }
        };
        downloads.insert(url.clone(), path);
    }

    Ok(downloads)
}

async fn save(page: &Page, directory: &Path, title: &str) -> std::io::Result<String> {
    let extension = file::extension_for(page.content_type.as_deref(), &page.final_url);
    let name = file::unique_name(directory, title, &extension)?;
    tokio::fs::write(directory.join(&name), &page.body).await?;
    tracing::info!("saved {}", name);
    Ok(name)
}
