//! WebDAV transport for ownCloud/Nextcloud public shares.
//!
//! Lists directories with `PROPFIND` (Depth 1), walks them depth-first for
//! PDF documents, and downloads document bytes. The sync engine only sees
//! the [`RemoteStore`] trait, so tests can substitute an in-memory tree.
//!
//! # Paths
//!
//! Every path handed in or out of this module is relative to the share
//! root, without leading or trailing slash (`"2. TENERIFE/Liga/R1.pdf"`).
//! Hrefs returned by the server are percent-decoded and mapped back to that
//! form by [`href_to_rel`].

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::models::RemoteEntry;

/// Default depth for [`list_directories_recursive`].
pub const DEFAULT_DIR_DEPTH: usize = 6;

const PROPFIND_BODY: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <d:resourcetype />
    <d:getcontenttype />
    <d:getcontentlength />
    <d:getlastmodified />
    <d:getetag />
    <oc:fileid />
  </d:prop>
</d:propfind>
"#;

/// Remote document source consumed by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Immediate children of `path` (the entry for `path` itself excluded).
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Raw bytes of the document at `path`.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Every PDF below `start`, recursively, sorted by path.
    async fn list_pdfs(&self, start: &str) -> Result<Vec<RemoteEntry>> {
        walk_pdfs(self, start).await
    }
}

/// Depth-first walk collecting PDF entries. Directories already visited are
/// not listed twice.
pub async fn walk_pdfs<S: RemoteStore + ?Sized>(store: &S, start: &str) -> Result<Vec<RemoteEntry>> {
    let mut stack = vec![trim_path(start).to_string()];
    let mut seen = HashSet::new();
    let mut pdfs = Vec::new();

    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let entries = store.list(&current).await?;
        debug!(dir = %current, entries = entries.len(), "listed directory");
        for entry in entries {
            if entry.path == current {
                continue;
            }
            if entry.is_dir {
                stack.push(entry.path);
            } else if entry.is_pdf() {
                pdfs.push(entry);
            }
        }
    }

    pdfs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(pdfs)
}

/// Immediate sub-directories of `base`, sorted and deduplicated.
pub async fn list_directories<S: RemoteStore + ?Sized>(store: &S, base: &str) -> Result<Vec<String>> {
    let base = trim_path(base);
    let dirs: BTreeSet<String> = store
        .list(base)
        .await?
        .into_iter()
        .filter(|e| e.is_dir && e.path != base)
        .map(|e| e.path)
        .collect();
    Ok(dirs.into_iter().collect())
}

/// Sub-directories of `base` down to `max_depth` levels. A directory that
/// cannot be listed contributes nothing.
pub async fn list_directories_recursive<S: RemoteStore + ?Sized>(
    store: &S,
    base: &str,
    max_depth: usize,
) -> Vec<String> {
    let mut out = BTreeSet::new();
    let mut frontier = vec![(trim_path(base).to_string(), 0usize)];

    while let Some((current, depth)) = frontier.pop() {
        if depth >= max_depth {
            continue;
        }
        let subs = match list_directories(store, &current).await {
            Ok(subs) => subs,
            Err(e) => {
                debug!(dir = %current, error = %e, "directory listing failed");
                Vec::new()
            }
        };
        for sub in subs {
            if out.insert(sub.clone()) {
                frontier.push((sub, depth + 1));
            }
        }
    }

    out.into_iter().collect()
}

/// HTTP client for one configured share.
pub struct WebDavClient {
    client: reqwest::Client,
    config: RemoteConfig,
    /// Path component of `base_url`, decoded, used to relativize hrefs.
    base_path: String,
}

impl WebDavClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.base_url)
            .with_context(|| format!("invalid remote base URL: {}", config.base_url))?;
        let base_path = urlencoding::decode(url.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| url.path().to_string());
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            base_path,
        })
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.public_share_auth {
            req.basic_auth(&self.config.share_token, Some(&self.config.share_password))
        } else {
            req
        }
    }

    async fn propfind(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let url = safe_join(&self.config.base_url, path);
        let method = reqwest::Method::from_bytes(b"PROPFIND").context("invalid HTTP method")?;
        let req = self
            .client
            .request(method, &url)
            .header("Depth", "1")
            .header("Content-Type", "text/xml")
            .body(PROPFIND_BODY)
            .timeout(Duration::from_secs(self.config.list_timeout_secs));

        let resp = self
            .with_auth(req)
            .send()
            .await
            .with_context(|| format!("PROPFIND {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "PROPFIND {} failed (HTTP {}): {}",
                url,
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let xml = resp.bytes().await?;
        let entries = parse_multistatus(&xml)?
            .into_iter()
            .map(|raw| raw.into_entry(&self.base_path, &self.config.share_token))
            .collect();
        Ok(entries)
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = trim_path(path);
        let entries = self.propfind(path).await?;
        Ok(entries.into_iter().filter(|e| e.path != path).collect())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = safe_join(&self.config.base_url, path);
        let req = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.download_timeout_secs));

        let resp = self
            .with_auth(req)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if !resp.status().is_success() {
            bail!("GET {} failed (HTTP {})", url, resp.status());
        }

        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Join a relative path onto the base URL, percent-encoding each segment.
/// Segments that arrive already encoded are decoded first so they are not
/// encoded twice.
pub fn safe_join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = trim_path(path);
    if path.is_empty() {
        return format!("{}/", base);
    }
    let encoded: Vec<String> = path
        .split('/')
        .map(|seg| {
            let decoded = urlencoding::decode(seg)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| seg.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect();
    format!("{}/{}", base, encoded.join("/"))
}

/// Map a `PROPFIND` href to a share-relative path.
///
/// Tries, in order: the decoded path of the configured base URL, the
/// `/public-files/<token>/` marker and the `/public.php/webdav/` marker.
/// Anything else is returned with surrounding slashes removed.
pub fn href_to_rel(href: &str, base_path: &str, share_token: &str) -> String {
    // Absolute hrefs carry scheme and host.
    let raw_path = match reqwest::Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let path = urlencoding::decode(&raw_path)
        .map(|s| s.into_owned())
        .unwrap_or(raw_path);

    let base = base_path.trim_end_matches('/');
    if !base.is_empty() {
        if let Some(rest) = path.strip_prefix(base) {
            if rest.is_empty() || rest.starts_with('/') {
                return trim_path(rest).to_string();
            }
        }
    }

    let markers = [format!("/public-files/{}/", share_token), "/public.php/webdav/".to_string()];
    for marker in &markers {
        if let Some((_, rest)) = path.split_once(marker.as_str()) {
            return trim_path(rest).to_string();
        }
    }

    trim_path(&path).to_string()
}

fn trim_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// One `<d:response>` with a 200 propstat, before path mapping.
#[derive(Debug, Default, Clone, PartialEq)]
struct RawResponse {
    href: String,
    is_dir: bool,
    content_type: Option<String>,
    content_length: Option<String>,
    last_modified: Option<String>,
    etag: Option<String>,
}

impl RawResponse {
    fn into_entry(self, base_path: &str, share_token: &str) -> RemoteEntry {
        RemoteEntry {
            path: href_to_rel(&self.href, base_path, share_token),
            is_dir: self.is_dir,
            content_type: self.content_type,
            size: self
                .content_length
                .as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok()),
            last_modified: self.last_modified,
            etag: self.etag,
        }
    }
}

/// Per-propstat accumulator; only kept when its status is 200.
#[derive(Debug, Default)]
struct PropStat {
    ok: bool,
    is_dir: bool,
    content_type: Option<String>,
    content_length: Option<String>,
    last_modified: Option<String>,
    etag: Option<String>,
}

/// Parse a `207 Multi-Status` body. Elements are matched by local name so
/// any namespace prefix works.
fn parse_multistatus(xml: &[u8]) -> Result<Vec<RawResponse>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut out = Vec::new();
    let mut response: Option<RawResponse> = None;
    let mut propstat: Option<PropStat> = None;
    let mut found_ok = false;
    let mut current: Option<Vec<u8>> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"response" => {
                        response = Some(RawResponse::default());
                        found_ok = false;
                    }
                    b"propstat" => propstat = Some(PropStat::default()),
                    b"collection" => {
                        if let Some(ps) = propstat.as_mut() {
                            ps.is_dir = true;
                        }
                    }
                    _ => {}
                }
                current = Some(name);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(ps) = propstat.as_mut() {
                        ps.is_dir = true;
                    }
                }
            }
            Ok(Event::Text(te)) => {
                let text = te
                    .unescape()
                    .map(|t| t.into_owned())
                    .context("invalid text in PROPFIND response")?;
                match (current.as_deref(), propstat.as_mut(), response.as_mut()) {
                    (Some(b"href"), _, Some(r)) => r.href = text,
                    (Some(b"status"), Some(ps), _) => ps.ok = text.contains("200"),
                    (Some(b"getcontenttype"), Some(ps), _) => ps.content_type = Some(text),
                    (Some(b"getcontentlength"), Some(ps), _) => ps.content_length = Some(text),
                    (Some(b"getlastmodified"), Some(ps), _) => ps.last_modified = Some(text),
                    (Some(b"getetag"), Some(ps), _) => ps.etag = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"propstat" => {
                        if let (Some(ps), Some(r)) = (propstat.take(), response.as_mut()) {
                            // First successful propstat wins.
                            if ps.ok && !found_ok {
                                found_ok = true;
                                r.is_dir = ps.is_dir;
                                r.content_type = ps.content_type;
                                r.content_length = ps.content_length;
                                r.last_modified = ps.last_modified;
                                r.etag = ps.etag;
                            }
                        }
                    }
                    b"response" => {
                        if let Some(r) = response.take() {
                            if found_ok {
                                out.push(r);
                            }
                        }
                    }
                    _ => {}
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("malformed PROPFIND response: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
