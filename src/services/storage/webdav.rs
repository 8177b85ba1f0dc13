//! WebDAV storage, also used for the cloud drive preset
//!
//! The cloud preset is the generic backend with a fixed endpoint and a
//! bearer token injected into every request through the HTTP agent's
//! default headers; no protocol logic of its own.

use super::{normalize_path, sort_entries, DownloadStream, StorageBackend};
use crate::error::{SyncError, SyncResult};
use crate::models::RemoteFile;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::io::Cursor;

/// Endpoint of the cloud drive WebDAV service
pub const CLOUD_WEBDAV_ENDPOINT: &str = "https://webdav.yandex.ru";

const DEFAULT_PROTOCOL: &str = "https";

pub struct WebDavBackend {
    client: reqwest_dav::Client,
    host: String,
    /// Path component of `host`, listing hrefs are relative to the server root
    base_path: String,
}

impl WebDavBackend {
    /// Connects to `uri`, either a full URL or a bare host combined with `protocol`
    ///
    /// Basic auth is used when both username and password are given.
    pub fn new(
        uri: &str,
        protocol: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> SyncResult<Self> {
        let auth = match (username, password) {
            (Some(user), Some(pass)) => reqwest_dav::Auth::Basic(user.to_string(), pass.to_string()),
            (None, None) => reqwest_dav::Auth::Anonymous,
            _ => {
                return Err(SyncError::Configuration(
                    "WebDAV username and password must be given together".to_string(),
                ))
            }
        };
        Self::build(host_url(uri, protocol)?, auth, None)
    }

    /// Cloud drive preset: fixed endpoint plus `Authorization: Bearer <token>`
    pub fn cloud(token: &str) -> SyncResult<Self> {
        Self::cloud_at(CLOUD_WEBDAV_ENDPOINT, token)
    }

    /// Bearer-authenticated backend against an arbitrary endpoint
    pub fn cloud_at(endpoint: &str, token: &str) -> SyncResult<Self> {
        if token.trim().is_empty() {
            return Err(SyncError::Configuration("cloud token is empty".to_string()));
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| SyncError::Configuration(format!("invalid cloud token: {}", e)))?;
        bearer.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let agent = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Self::build(
            host_url(endpoint, None)?,
            reqwest_dav::Auth::Anonymous,
            Some(agent),
        )
    }

    fn build(
        host: String,
        auth: reqwest_dav::Auth,
        agent: Option<reqwest::Client>,
    ) -> SyncResult<Self> {
        let mut builder = reqwest_dav::ClientBuilder::new();
        if let Some(agent) = agent {
            builder = builder.set_agent(agent);
        }
        let client = builder
            .set_host(host.clone())
            .set_auth(auth)
            .build()
            .map_err(|e| SyncError::Configuration(format!("WebDAV client error: {:?}", e)))?;

        let base_path = reqwest::Url::parse(&host)
            .map(|url| decode(url.path()))
            .unwrap_or_default();

        Ok(Self {
            client,
            host,
            base_path,
        })
    }

    fn full_path(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_path.trim_end_matches('/'),
            normalize_path(path)
        )
    }
}

#[async_trait]
impl StorageBackend for WebDavBackend {
    fn describe(&self) -> String {
        format!("webdav:{}", self.host)
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteFile>> {
        let path = normalize_path(path);
        let listing = self
            .client
            .list(path, reqwest_dav::Depth::Number(1))
            .await?;
        let requested = self.full_path(path);

        let mut entries = Vec::new();
        for item in listing {
            let entry = match &item {
                reqwest_dav::list_cmd::ListEntity::File(file) => {
                    let size = file.content_length.max(0) as u64;
                    entry_name(&file.href, &requested)
                        .map(|name| RemoteFile::file(name).with_size(size))
                }
                reqwest_dav::list_cmd::ListEntity::Folder(folder) => {
                    entry_name(&folder.href, &requested).map(RemoteFile::dir)
                }
            };
            entries.extend(entry);
        }
        Ok(sort_entries(entries))
    }

    async fn create_folder(&self, path: &str) -> SyncResult<()> {
        self.client.mkcol(normalize_path(path)).await?;
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, path: &str) -> SyncResult<()> {
        self.client.put(normalize_path(path), bytes).await?;
        Ok(())
    }

    async fn open_download_stream(&self, path: &str) -> SyncResult<DownloadStream> {
        let response = self
            .client
            .get(normalize_path(path))
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        self.client.delete(normalize_path(path)).await?;
        Ok(())
    }
}

/// Builds the base URL from a full URL or a bare host
fn host_url(uri: &str, protocol: Option<&str>) -> SyncResult<String> {
    let uri = uri.trim().trim_end_matches('/');
    if uri.is_empty() {
        return Err(SyncError::Configuration("WebDAV uri is empty".to_string()));
    }
    if uri.contains("://") {
        return Ok(uri.to_string());
    }
    Ok(format!(
        "{}://{}",
        protocol.unwrap_or(DEFAULT_PROTOCOL),
        uri
    ))
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Last path segment of a listing href, `None` for the listed directory itself
fn entry_name(href: &str, requested: &str) -> Option<String> {
    let decoded = decode(href);
    // Some servers answer with absolute URLs instead of paths
    let path = match decoded.find("://") {
        Some(scheme_end) => {
            let rest = &decoded[scheme_end + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/")
        }
        None => decoded.as_str(),
    };

    let trimmed = path.trim_matches('/');
    if trimmed == requested.trim_matches('/') {
        return None;
    }
    trimmed
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::archive_store::ArchiveStore;
    use std::io::Read;
    use std::sync::Arc;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// PROPFIND answer; entries with a size are files, the others folders
    fn multistatus(entries: &[(&str, Option<u64>)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="utf-8"?><D:multistatus xmlns:D="DAV:">"#,
        );
        for (href, size) in entries {
            let props = match size {
                Some(len) => format!(
                    "<D:resourcetype/><D:getcontentlength>{}</D:getcontentlength>",
                    len
                ),
                None => "<D:resourcetype><D:collection/></D:resourcetype>".to_string(),
            };
            xml.push_str(&format!(
                "<D:response><D:href>{}</D:href><D:propstat>\
                 <D:status>HTTP/1.1 200 OK</D:status><D:prop>\
                 <D:getlastmodified>Wed, 10 Apr 2019 14:00:00 GMT</D:getlastmodified>\
                 {}</D:prop></D:propstat></D:response>",
                href, props
            ));
        }
        xml.push_str("</D:multistatus>");
        xml
    }

    fn anonymous(server: &MockServer) -> WebDavBackend {
        WebDavBackend::new(&server.uri(), None, None, None).unwrap()
    }

    async fn read_all(backend: &WebDavBackend, path: &str) -> SyncResult<Vec<u8>> {
        let mut content = Vec::new();
        backend
            .open_download_stream(path)
            .await?
            .read_to_end(&mut content)?;
        Ok(content)
    }

    #[tokio::test]
    async fn test_list_skips_directory_itself() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/M4M/c1/42"))
            .and(header("depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&[
                ("/M4M/c1/42/", None),
                ("/M4M/c1/42/2024.01.03.m4m", Some(48)),
                ("/M4M/c1/42/.Living%20room", Some(0)),
                ("/M4M/c1/42/old/", None),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let files = anonymous(&server).list("/M4M/c1/42").await.unwrap();
        assert_eq!(
            files,
            vec![
                RemoteFile::file(".Living room"),
                RemoteFile::file("2024.01.03.m4m"),
                RemoteFile::dir("old"),
            ]
        );
        assert_eq!(files[0].size, Some(0));
        assert_eq!(files[1].size, Some(48));
        assert_eq!(files[2].size, None);
    }

    #[tokio::test]
    async fn test_list_below_base_path() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/files/u/M4M"))
            .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&[
                ("/dav/files/u/M4M/", None),
                ("/dav/files/u/M4M/c1/", None),
            ])))
            .mount(&server)
            .await;

        let backend =
            WebDavBackend::new(&format!("{}/dav/files/u", server.uri()), None, None, None)
                .unwrap();
        assert_eq!(backend.list("M4M").await.unwrap(), vec![RemoteFile::dir("c1")]);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let backend = anonymous(&server);
        let err = backend.list("M4M/c9").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)), "{:?}", err);
        let err = read_all(&backend, "M4M/c1/42/2030.01.01.m4m")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_server_error_is_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = read_all(&anonymous(&server), "M4M/f").await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_create_folder() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(path("/M4M/c1"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        anonymous(&server).create_folder("/M4M/c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/M4M/c1/42/2024.01.03.m4m"))
            .and(body_bytes(b"first".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/M4M/c1/42/2024.01.03.m4m"))
            .and(body_bytes(b"second".to_vec()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = anonymous(&server);
        let target = "M4M/c1/42/2024.01.03.m4m";
        backend.upload(b"first".to_vec(), target).await.unwrap();
        backend.upload(b"second".to_vec(), target).await.unwrap();
    }

    #[tokio::test]
    async fn test_download_and_remove() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/M4M/c1/42/2024.01.03.m4m"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"rows".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/M4M/c1/42/.Kitchen"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = anonymous(&server);
        assert_eq!(
            read_all(&backend, "/M4M/c1/42/2024.01.03.m4m").await.unwrap(),
            b"rows"
        );
        backend.remove("M4M/c1/42/.Kitchen").await.unwrap();
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            WebDavBackend::new(&server.uri(), None, Some("alice"), Some("secret")).unwrap();
        assert_eq!(read_all(&backend, "f").await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_cloud_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("day"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = WebDavBackend::cloud_at(&server.uri(), " token-123 ").unwrap();
        backend.upload(b"day".to_vec(), "M4M/f").await.unwrap();
        assert_eq!(read_all(&backend, "M4M/f").await.unwrap(), b"day");
    }

    #[tokio::test]
    async fn test_archive_store_creates_root_over_webdav() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(207).set_body_string(multistatus(&[("/", None)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path("/M4M"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        ArchiveStore::open(Arc::new(anonymous(&server))).await.unwrap();
    }

    #[test]
    fn test_host_url() {
        assert_eq!(
            host_url("dav.example.com", None).unwrap(),
            "https://dav.example.com"
        );
        assert_eq!(
            host_url("dav.example.com", Some("http")).unwrap(),
            "http://dav.example.com"
        );
        assert_eq!(
            host_url("https://cloud.example.com/remote.php/dav/files/u/", Some("http")).unwrap(),
            "https://cloud.example.com/remote.php/dav/files/u"
        );
        assert!(host_url("  ", None).is_err());
    }

    #[test]
    fn test_entry_name_skips_listed_directory() {
        assert_eq!(entry_name("/M4M/", "/M4M"), None);
        assert_eq!(entry_name("/M4M/c1/", "/M4M"), Some("c1".to_string()));
        assert_eq!(entry_name("/", "/"), None);
    }

    #[test]
    fn test_entry_name_decodes_and_handles_prefix() {
        let requested = "/remote.php/dav/files/u/M4M/c1/42";
        assert_eq!(
            entry_name("/remote.php/dav/files/u/M4M/c1/42/.Living%20room", requested),
            Some(".Living room".to_string())
        );
        assert_eq!(
            entry_name("https://host/remote.php/dav/files/u/M4M/c1/42/", requested),
            None
        );
    }

    #[test]
    fn test_mismatched_credentials_rejected() {
        let err = WebDavBackend::new("dav.example.com", None, Some("alice"), None)
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_cloud_preset() {
        let backend = WebDavBackend::cloud("token-123").unwrap();
        assert_eq!(backend.describe(), format!("webdav:{}", CLOUD_WEBDAV_ENDPOINT));
        assert_eq!(backend.full_path("/M4M"), "/M4M");
        assert!(WebDavBackend::cloud(" ").is_err());
    }

    #[test]
    fn test_full_path_keeps_base_prefix() {
        let backend =
            WebDavBackend::new("https://cloud.example.com/remote.php/dav/files/u", None, None, None)
                .unwrap();
        assert_eq!(
            backend.full_path("/M4M/c1"),
            "/remote.php/dav/files/u/M4M/c1"
        );
    }
}
