use std::fmt;
use std::str::FromStr;

use oci_spec::distribution::{ParseError, Reference};
use thiserror::Error;

const SCHEME: &str = "docker";
const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_LEGACY: &str = "index.docker.io";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid image reference {0:?}: expected docker://HOST/IMAGENAME[:TAG]")]
    Malformed(String),
    #[error("unsupported scheme {0:?} in image reference, only \"docker\" is supported")]
    UnsupportedScheme(String),
    #[error("image reference {0:?} has no registry host")]
    MissingHost(String),
    #[error("invalid image reference {reference:?}: {source}")]
    Invalid {
        reference: String,
        #[source]
        source: ParseError,
    },
}

/// A parsed `docker://HOST/REPOSITORY[:TAG][@DIGEST]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    scheme: String,
    reference: Reference,
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| ReferenceError::Malformed(s.to_string()))?;
        if scheme != SCHEME {
            return Err(ReferenceError::UnsupportedScheme(scheme.to_string()));
        }

        let host = match rest.split_once('/') {
            Some((host, _)) if !host.is_empty() => host,
            _ => return Err(ReferenceError::MissingHost(s.to_string())),
        };

        let reference = Reference::try_from(rest).map_err(|source| ReferenceError::Invalid {
            reference: s.to_string(),
            source,
        })?;

        // Without a dot, port or "localhost" the first component is read as a
        // Docker Hub namespace, not a host.
        let expected = if host == DOCKER_HUB_LEGACY { DOCKER_HUB } else { host };
        if reference.registry() != expected {
            return Err(ReferenceError::MissingHost(s.to_string()));
        }

        Ok(ImageReference {
            scheme: scheme.to_string(),
            reference,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn registry(&self) -> &str {
        self.reference.registry()
    }

    /// Host to talk to for the registry API.
    pub fn resolve_registry(&self) -> &str {
        self.reference.resolve_registry()
    }

    pub fn repository(&self) -> &str {
        self.reference.repository()
    }

    /// Tag, `latest` when neither tag nor digest was given.
    pub fn tag(&self) -> Option<&str> {
        self.reference.tag()
    }

    pub fn digest(&self) -> Option<&str> {
        self.reference.digest()
    }

    /// What to ask the manifests endpoint for: the digest when pinned, else the tag.
    pub fn manifest_reference(&self) -> &str {
        self.digest().or(self.tag()).unwrap_or("latest")
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.reference)
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn parses_full_reference() {
        let r = ImageReference::parse("docker://registry-1.docker.io/library/nginx:1.25").unwrap();
        assert_eq!(r.scheme(), "docker");
        assert_eq!(r.registry(), "registry-1.docker.io");
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.tag(), Some("1.25"));
        assert_eq!(r.digest(), None);
        assert_eq!(r.manifest_reference(), "1.25");
    }

    #[test]
    fn tag_defaults_to_latest() {
        let r = ImageReference::parse("docker://quay.io/coreos/etcd").unwrap();
        assert_eq!(r.tag(), Some("latest"));
        assert_eq!(r.manifest_reference(), "latest");
    }

    #[test]
    fn digest_references_are_accepted() {
        let r = ImageReference::parse(&format!("docker://quay.io/coreos/etcd@{}", DIGEST)).unwrap();
        assert_eq!(r.registry(), "quay.io");
        assert_eq!(r.repository(), "coreos/etcd");
        assert_eq!(r.tag(), None);
        assert_eq!(r.digest(), Some(DIGEST));
        assert_eq!(r.manifest_reference(), DIGEST);
    }

    #[test]
    fn host_may_carry_a_port() {
        let r = ImageReference::parse("docker://localhost:5000/team/app:v1").unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "team/app");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn docker_hub_resolves_to_registry_host() {
        let r = ImageReference::parse("docker://docker.io/library/alpine").unwrap();
        assert_eq!(r.registry(), "docker.io");
        assert_eq!(r.resolve_registry(), "index.docker.io");
    }

    #[test]
    fn display_keeps_scheme() {
        let r = ImageReference::parse("docker://ghcr.io/owner/my-repo:1.0.0-rc_1").unwrap();
        assert_eq!(r.to_string(), "docker://ghcr.io/owner/my-repo:1.0.0-rc_1");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(
            ImageReference::parse("not-a-valid-ref"),
            Err(ReferenceError::Malformed("not-a-valid-ref".to_string()))
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            ImageReference::parse("https://quay.io/coreos/etcd"),
            Err(ReferenceError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_missing_host() {
        assert!(matches!(
            ImageReference::parse("docker://nginx"),
            Err(ReferenceError::MissingHost(_))
        ));
        assert!(matches!(
            ImageReference::parse("docker:///library/nginx"),
            Err(ReferenceError::MissingHost(_))
        ));
        // "team" is a namespace, not a registry host.
        assert!(matches!(
            ImageReference::parse("docker://team/app"),
            Err(ReferenceError::MissingHost(_))
        ));
    }

    #[test]
    fn rejects_bad_names() {
        for bad in [
            "docker://quay.io/",
            "docker://quay.io/Upper/case",
            "docker://quay.io/a//b",
            "docker://quay.io/a..b",
            "docker://quay.io/a:",
            "docker://quay.io/a:.tag",
            "docker://host:port/a",
            "docker://quay.io/a@sha256:abc",
        ] {
            assert!(
                matches!(ImageReference::parse(bad), Err(ReferenceError::Invalid { .. })),
                "{} should be rejected as invalid",
                bad
            );
        }
    }
}
