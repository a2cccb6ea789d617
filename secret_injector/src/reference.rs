//! Parsing of secret reference annotations
//!
//! A reference is either a bare secret ARN or `<secret-arn>:<absolute-mount-path>`.
//! The ARN itself contains colons, so the split happens after the last
//! `:secret:<name>` segment rather than at the first colon.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Mount root used when a reference does not carry its own mount path
pub const DEFAULT_MOUNT_ROOT: &str = "/secrets";

const SECRET_RESOURCE_PREFIX: &str = "secret:";

static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*:secret:[^:]*):?(.*)$").expect("reference pattern is valid"));

/// A parsed secret reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    /// Secret identifier (ARN) passed to the secret store
    pub secret_id: String,
    /// Absolute path the secret is mounted at inside application containers
    pub mount_path: String,
    /// `mount_path` without its leading separator, relative to the shared volume
    pub sub_path: String,
}

impl SecretReference {
    /// Parses a single `<secret-arn>[:<mount-path>]` reference
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (secret_id, suffix) = match REFERENCE_PATTERN.captures(raw) {
            Some(caps) => (
                caps.get(1).map_or("", |m| m.as_str()),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (raw, ""),
        };

        let name = secret_name(secret_id)?;

        let mount_path = if suffix.is_empty() {
            format!("{DEFAULT_MOUNT_ROOT}/{name}")
        } else {
            suffix.to_string()
        };

        let Some(sub_path) = mount_path.strip_prefix('/').filter(|p| is_relative_sub_path(p)) else {
            return Err(Error::InvalidMountPath(mount_path));
        };

        Ok(Self {
            secret_id: secret_id.to_string(),
            sub_path: sub_path.to_string(),
            mount_path,
        })
    }
}

impl FromStr for SecretReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parses a comma-separated list of references, preserving declaration order
///
/// The first malformed entry aborts the whole list.
pub fn parse_references(annotation: &str) -> Result<Vec<SecretReference>> {
    annotation
        .split(',')
        .map(str::parse::<SecretReference>)
        .collect()
}

/// Whether `path` is usable as a volume `subPath`: relative, no empty
/// components and never leaving the volume
fn is_relative_sub_path(path: &str) -> bool {
    path.split('/')
        .all(|component| !matches!(component, "" | "." | ".."))
}

/// Validates `arn:<partition>:secretsmanager:<region>:<account>:secret:<name>` and
/// returns `<name>`
fn secret_name(secret_id: &str) -> Result<&str> {
    let invalid = || Error::InvalidIdentifier(secret_id.to_string());

    let parts: Vec<&str> = secret_id.splitn(6, ':').collect();
    let &[prefix, partition, service, region, account, resource] = parts.as_slice() else {
        return Err(invalid());
    };

    if prefix != "arn"
        || partition.is_empty()
        || service != "secretsmanager"
        || region.is_empty()
        || account.is_empty()
    {
        return Err(invalid());
    }

    let name = resource
        .strip_prefix(SECRET_RESOURCE_PREFIX)
        .ok_or_else(invalid)?;

    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_+=.@-".contains(c));

    if valid_name { Ok(name) } else { Err(invalid()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:database-password-hlRvvF";

    #[test]
    fn test_bare_arn_derives_mount_path() {
        let reference = SecretReference::parse(ARN).unwrap();
        assert_eq!(reference.secret_id, ARN);
        assert_eq!(reference.mount_path, "/secrets/database-password-hlRvvF");
        assert_eq!(reference.sub_path, "secrets/database-password-hlRvvF");
    }

    #[test]
    fn test_explicit_mount_path() {
        let reference = SecretReference::parse(&format!("{ARN}:/var/log/s")).unwrap();
        assert_eq!(reference.secret_id, ARN);
        assert_eq!(reference.mount_path, "/var/log/s");
        assert_eq!(reference.sub_path, "var/log/s");
    }

    #[test]
    fn test_trailing_colon_falls_back_to_default_path() {
        let reference = SecretReference::parse(&format!("{ARN}:")).unwrap();
        assert_eq!(reference.mount_path, "/secrets/database-password-hlRvvF");
    }

    #[test]
    fn test_secret_name_with_slashes() {
        let arn = "arn:aws:secretsmanager:eu-west-1:123456789012:secret:prod/db/password";
        let reference = SecretReference::parse(arn).unwrap();
        assert_eq!(reference.mount_path, "/secrets/prod/db/password");
    }

    #[test]
    fn test_relative_mount_path_is_rejected() {
        let err = SecretReference::parse(&format!("{ARN}:var/log/s")).unwrap_err();
        assert!(matches!(err, Error::InvalidMountPath(path) if path == "var/log/s"));
    }

    #[test]
    fn test_root_mount_path_is_rejected() {
        let err = SecretReference::parse(&format!("{ARN}:/")).unwrap_err();
        assert!(matches!(err, Error::InvalidMountPath(_)));
    }

    #[test]
    fn test_mount_path_must_stay_inside_volume() {
        for path in ["//etc/x", "/var/../../etc", "/var/./log", "/var//log", "/var/log/", "/.."] {
            let err = SecretReference::parse(&format!("{ARN}:{path}")).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidMountPath(p) if p == path),
                "{path} was accepted"
            );
        }
    }

    #[test]
    fn test_secret_name_with_dot_segments_is_rejected() {
        let arn = "arn:aws:secretsmanager:us-east-1:123456789012:secret:../etc";
        let err = SecretReference::parse(arn).unwrap_err();
        assert!(matches!(err, Error::InvalidMountPath(path) if path == "/secrets/../etc"));
    }

    #[test]
    fn test_dotted_file_names_are_allowed() {
        let reference = SecretReference::parse(&format!("{ARN}:/etc/app/.env")).unwrap();
        assert_eq!(reference.sub_path, "etc/app/.env");
    }

    #[test]
    fn test_invalid_identifier_names_offending_string() {
        let err = SecretReference::parse("not-a-valid-id").unwrap_err();
        assert!(matches!(&err, Error::InvalidIdentifier(id) if id == "not-a-valid-id"));
        assert!(err.to_string().contains("not-a-valid-id"));
    }

    #[test]
    fn test_wrong_service_is_rejected() {
        let err = SecretReference::parse("arn:aws:s3:us-east-1:123456789012:secret:bucket")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
    }

    #[test]
    fn test_missing_secret_name_is_rejected() {
        let err = SecretReference::parse("arn:aws:secretsmanager:us-east-1:123456789012:secret:")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
    }

    #[test]
    fn test_parse_references_preserves_order() {
        let annotation = format!(
            "{ARN}:/var/my-db-pass, arn:aws:secretsmanager:us-east-1:123456789012:secret:s3-bucker-2312"
        );
        let references = parse_references(&annotation).unwrap();
        let paths: Vec<_> = references.iter().map(|r| r.mount_path.as_str()).collect();
        assert_eq!(paths, ["/var/my-db-pass", "/secrets/s3-bucker-2312"]);
    }

    #[test]
    fn test_parse_references_fails_on_any_bad_entry() {
        let annotation = format!("{ARN},batata");
        let err = parse_references(&annotation).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(id) if id == "batata"));
    }
}
