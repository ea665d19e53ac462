use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use oci_spec::image::{
    DescriptorBuilder, Digest, ImageIndex, ImageIndexBuilder, ImageManifest, MediaType,
    OciLayoutBuilder, ANNOTATION_REF_NAME,
};
use oci_spec::OciSpecError;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::config::FetchPolicy;
use crate::credentials::Credentials;
use crate::reference::ImageReference;

// Docker schema 2 types have no variant of their own in oci-spec.
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to set up HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("registry answered {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("no image for linux/{0} in the manifest list")]
    NoCompatibleImage(String),
    #[error("manifest list entry {0} is itself a manifest list")]
    NestedIndex(String),
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
    #[error("unable to parse manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("unable to build image layout: {0}")]
    Layout(#[from] OciSpecError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> FetchError {
        let context = context.into();
        move |source| FetchError::Io { context, source }
    }
}

/// Populates a directory with the on-disk form of an image.
pub trait ImageFetcher {
    fn fetch(&self, reference: &ImageReference, dest: &Path) -> Result<(), FetchError>;
}

/// Pulls images over the registry HTTP API and writes them as an OCI image layout.
pub struct RegistryFetcher {
    credentials: Credentials,
    policy: FetchPolicy,
}

impl RegistryFetcher {
    pub fn new(credentials: Credentials, policy: FetchPolicy) -> RegistryFetcher {
        RegistryFetcher {
            credentials,
            policy,
        }
    }

    fn client(&self) -> Result<Client, FetchError> {
        Client::builder()
            .danger_accept_invalid_certs(self.policy.skip_tls_verify)
            .user_agent(concat!("oci-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)
    }
}

impl ImageFetcher for RegistryFetcher {
    fn fetch(&self, reference: &ImageReference, dest: &Path) -> Result<(), FetchError> {
        let mut registry = Registry {
            client: self.client()?,
            base: format!(
                "{}://{}/v2/{}",
                if self.policy.allow_http { "http" } else { "https" },
                reference.resolve_registry(),
                reference.repository(),
            ),
            repository: reference.repository().to_string(),
            credentials: &self.credentials,
            verbose: self.policy.verbose,
            token: None,
            basic: false,
        };
        let layout = Layout::new(dest);

        let pulled = registry.resolve_manifest(reference.manifest_reference())?;
        let manifest: ImageManifest = serde_json::from_slice(&pulled.body)?;
        layout.write_blob(pulled.digest.as_ref(), &pulled.body)?;
        log::info!("Pulled manifest: {}", pulled.digest);

        let config = manifest.config();
        registry.download_blob(config.digest().as_ref(), &layout)?;

        for (i, blob) in manifest.layers().iter().enumerate() {
            log::info!(
                "Downloading layer {}/{}: {} (Size: {})",
                i + 1,
                manifest.layers().len(),
                blob.digest(),
                blob.size()
            );
            registry.download_blob(blob.digest().as_ref(), &layout)?;
        }

        layout.write_index(
            &pulled.media_type,
            &pulled.digest,
            pulled.body.len() as u64,
            reference.tag(),
        )
    }
}

/// A manifest as served by the registry.
struct Pulled {
    media_type: MediaType,
    digest: Digest,
    body: Vec<u8>,
}

struct Registry<'a> {
    client: Client,
    base: String,
    repository: String,
    credentials: &'a Credentials,
    verbose: bool,
    token: Option<String>,
    // Set once the registry has asked for HTTP basic auth.
    basic: bool,
}

impl Registry<'_> {
    /// Fetch the manifest for `reference`. A manifest list is followed to the
    /// entry for this platform, one level deep.
    fn resolve_manifest(&mut self, reference: &str) -> Result<Pulled, FetchError> {
        let pulled = self.fetch_manifest(reference)?;
        if !is_index(&pulled.media_type) {
            return Ok(pulled);
        }

        let index: ImageIndex = serde_json::from_slice(&pulled.body)?;
        let digest = select_platform(&index, host_arch())?;
        if self.verbose {
            log::debug!("selected {} from manifest list", digest);
        }
        let pulled = self.fetch_manifest(&digest)?;
        if is_index(&pulled.media_type) {
            return Err(FetchError::NestedIndex(digest));
        }
        Ok(pulled)
    }

    fn fetch_manifest(&mut self, reference: &str) -> Result<Pulled, FetchError> {
        let url = format!("{}/manifests/{}", self.base, reference);
        let accept = [
            MediaType::ImageManifest,
            MediaType::ImageIndex,
            MediaType::from(DOCKER_MANIFEST),
            MediaType::from(DOCKER_MANIFEST_LIST),
        ]
        .iter()
        .map(MediaType::to_string)
        .collect::<Vec<_>>()
        .join(", ");
        let response = self.get(&url, Some(&accept))?;

        let header_digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let body = response
            .bytes()
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?
            .to_vec();

        let media_type = match content_type {
            Some(ct) if ct != "application/json" && !ct.is_empty() => MediaType::from(ct.as_str()),
            _ => media_type_of(&body)?,
        };
        let digest = header_digest.unwrap_or_else(|| sha256_digest(&body));
        let digest = match Digest::from_str(&digest) {
            Ok(digest) => digest,
            Err(_) => return Err(FetchError::InvalidDigest(digest)),
        };

        Ok(Pulled {
            media_type,
            digest,
            body,
        })
    }

    fn download_blob(&mut self, digest: &str, layout: &Layout) -> Result<(), FetchError> {
        let url = format!("{}/blobs/{}", self.base, digest);
        let mut response = self.get(&url, None)?;

        let path = layout.blob_path(digest)?;
        let mut file = File::create(&path)
            .map_err(FetchError::io(format!("unable to create {}", path.display())))?;
        response
            .copy_to(&mut file)
            .map_err(|source| FetchError::Http { url, source })?;
        Ok(())
    }

    fn get(&mut self, url: &str, accept: Option<&str>) -> Result<Response, FetchError> {
        if self.verbose {
            log::debug!("GET {}", url);
        }
        let response = self.send(self.request(url, accept), url)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response, url);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| FetchError::Auth(format!("{} requires authentication", url)))?;
        self.authenticate(&challenge)?;

        if self.verbose {
            log::debug!("GET {} (authenticated)", url);
        }
        let response = self.send(self.request(url, accept), url)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Auth(format!("access to {} denied", url)));
        }
        check_status(response, url)
    }

    fn request(&self, url: &str, accept: Option<&str>) -> RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None if self.basic => request.basic_auth(
                &self.credentials.username,
                Some(&self.credentials.password),
            ),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, FetchError> {
        request.send().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })
    }

    fn authenticate(&mut self, challenge: &str) -> Result<(), FetchError> {
        let (scheme, params) = parse_challenge(challenge);
        if scheme.eq_ignore_ascii_case("basic") {
            if self.credentials.is_anonymous() {
                return Err(FetchError::Auth(
                    "registry requires a username and password".to_string(),
                ));
            }
            self.basic = true;
            return Ok(());
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(FetchError::Auth(format!(
                "unsupported authentication scheme {:?}",
                scheme
            )));
        }

        let realm = params
            .get("realm")
            .ok_or_else(|| FetchError::Auth("challenge has no realm".to_string()))?;
        let scope = params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));

        let mut request = self.client.get(realm.as_str()).query(&[("scope", &scope)]);
        if let Some(service) = params.get("service") {
            request = request.query(&[("service", service)]);
        }
        if !self.credentials.is_anonymous() {
            request = request.basic_auth(
                &self.credentials.username,
                Some(&self.credentials.password),
            );
        }
        if self.verbose {
            log::debug!("requesting token from {} for {}", realm, scope);
        }

        let response = check_status(self.send(request, realm)?, realm)
            .map_err(|e| FetchError::Auth(e.to_string()))?;

        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }
        let body: TokenResponse = response.json().map_err(|source| FetchError::Http {
            url: realm.to_string(),
            source,
        })?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| FetchError::Auth("token response carried no token".to_string()))?;
        self.token = Some(token);
        Ok(())
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, FetchError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            url: url.to_string(),
            status: response.status(),
        })
    }
}

/// Split a `WWW-Authenticate` value into its scheme and parameters.
fn parse_challenge(header: &str) -> (String, HashMap<String, String>) {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

    let mut params = HashMap::new();
    let mut rest = rest.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, remainder)) => (value, remainder),
                None => (quoted, ""),
            }
        } else {
            after.split_once(',').unwrap_or((after, ""))
        };
        params.insert(key, value.trim().to_string());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    (scheme.to_string(), params)
}

fn is_index(media_type: &MediaType) -> bool {
    *media_type == MediaType::ImageIndex || media_type.as_ref() == DOCKER_MANIFEST_LIST
}

/// Media type of a manifest served without a useful `Content-Type`.
fn media_type_of(body: &[u8]) -> Result<MediaType, FetchError> {
    #[derive(Deserialize)]
    struct Untyped {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
        manifests: Option<serde_json::Value>,
    }
    let untyped: Untyped = serde_json::from_slice(body)?;
    Ok(match (untyped.media_type, untyped.manifests) {
        (Some(media_type), _) => MediaType::from(media_type.as_str()),
        (None, Some(_)) => MediaType::ImageIndex,
        (None, None) => MediaType::ImageManifest,
    })
}

fn select_platform(index: &ImageIndex, arch: &str) -> Result<String, FetchError> {
    let matches = |wanted: &str| {
        index.manifests().iter().find(|d| {
            d.platform().as_ref().map_or(false, |p| {
                p.os().to_string() == "linux" && p.architecture().to_string() == wanted
            })
        })
    };
    matches(arch)
        .or_else(|| matches("amd64"))
        .map(|d| d.digest().to_string())
        .ok_or_else(|| FetchError::NoCompatibleImage(arch.to_string()))
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        _ => "amd64",
    }
}

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// An OCI image layout rooted at a directory.
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn new(root: &Path) -> Layout {
        Layout {
            root: root.to_path_buf(),
        }
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf, FetchError> {
        let (algorithm, hex) = digest
            .split_once(':')
            .filter(|(a, h)| is_plain_name(a) && is_plain_name(h))
            .ok_or_else(|| FetchError::InvalidDigest(digest.to_string()))?;
        let folder = self.root.join("blobs").join(algorithm);
        std::fs::create_dir_all(&folder)
            .map_err(FetchError::io(format!("unable to create {}", folder.display())))?;
        Ok(folder.join(hex))
    }

    fn write_blob(&self, digest: &str, bytes: &[u8]) -> Result<(), FetchError> {
        let path = self.blob_path(digest)?;
        std::fs::write(&path, bytes)
            .map_err(FetchError::io(format!("unable to write {}", path.display())))
    }

    /// Write `oci-layout` and an `index.json` naming the one pulled manifest.
    fn write_index(
        &self,
        media_type: &MediaType,
        digest: &Digest,
        size: u64,
        tag: Option<&str>,
    ) -> Result<(), FetchError> {
        let mut manifest = DescriptorBuilder::default()
            .media_type(media_type.clone())
            .digest(digest.clone())
            .size(size);
        if let Some(tag) = tag {
            manifest = manifest.annotations(HashMap::from([(
                ANNOTATION_REF_NAME.to_string(),
                tag.to_string(),
            )]));
        }
        let index = ImageIndexBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageIndex)
            .manifests(vec![manifest.build()?])
            .build()?;
        let layout = OciLayoutBuilder::default()
            .image_layout_version(IMAGE_LAYOUT_VERSION)
            .build()?;

        self.write_json("oci-layout", &layout)?;
        self.write_json("index.json", &index)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), FetchError> {
        let path = self.root.join(name);
        let file = File::create(&path)
            .map_err(FetchError::io(format!("unable to create {}", path.display())))?;
        serde_json::to_writer(&file, value).map_err(|e| FetchError::Io {
            context: format!("unable to write {}", path.display()),
            source: e.into(),
        })
    }
}

// Digest parts become path components, so they must not be able to traverse.
fn is_plain_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'))
}
