//! §4.1 Key Parser — derives tenant-identifying fields from an object key.

use snafu::Snafu;

/// Deployment environment, derived from the leading dash-prefix of `cluster`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    fn from_cluster(cluster: &str) -> Self {
        if cluster.starts_with("stg-") {
            Self::Staging
        } else if cluster.starts_with("dev-") {
            Self::Development
        } else {
            // `prod-*` and any other prefix default to production.
            Self::Production
        }
    }
}

/// Fields derived from a source object key: `<cluster>/<namespace>/<application>/<pod>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantInfo {
    pub cluster: String,
    pub namespace: String,
    /// The tenant identifier. Always equal to `namespace`.
    pub tenant: String,
    pub application: String,
    pub pod: String,
    pub environment: Environment,
}

#[derive(Debug, Snafu)]
pub enum KeyParseError {
    #[snafu(display("key {key:?} has {segments} segments, fewer than the required 5"))]
    TooFewSegments { key: String, segments: usize },
    #[snafu(display("key {key:?} has an empty leading segment at index {index}"))]
    EmptyLeadingSegment { key: String, index: usize },
}

/// Parses an object key into its tenant-identifying fields.
///
/// Non-recoverable on failure per spec §4.1 — callers must not retry.
pub fn parse_key(key: &str) -> Result<TenantInfo, KeyParseError> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() < 5 {
        return TooFewSegmentsSnafu {
            key: key.to_owned(),
            segments: segments.len(),
        }
        .fail();
    }

    for (index, segment) in segments.iter().take(4).enumerate() {
        if segment.trim().is_empty() {
            return EmptyLeadingSegmentSnafu {
                key: key.to_owned(),
                index,
            }
            .fail();
        }
    }

    let cluster = segments[0].to_owned();
    let namespace = segments[1].to_owned();
    let application = segments[2].to_owned();
    let pod = segments[3].to_owned();
    let environment = Environment::from_cluster(&cluster);

    Ok(TenantInfo {
        tenant: namespace.clone(),
        cluster,
        namespace,
        application,
        pod,
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path() {
        let info = parse_key("cluster-a/tenant-x/svc-a/pod-1/file.json.gz").unwrap();
        assert_eq!(info.cluster, "cluster-a");
        assert_eq!(info.tenant, "tenant-x");
        assert_eq!(info.namespace, "tenant-x");
        assert_eq!(info.application, "svc-a");
        assert_eq!(info.pod, "pod-1");
        assert_eq!(info.environment, Environment::Production);
    }

    #[test]
    fn six_segments_is_still_valid() {
        let info = parse_key("c/ns/app/pod/dir/file.json").unwrap();
        assert_eq!(info.pod, "pod");
    }

    #[test]
    fn too_few_segments_is_non_recoverable() {
        assert!(parse_key("c/ns/app/pod").is_err());
    }

    #[test]
    fn empty_segment_three_is_non_recoverable() {
        assert!(parse_key("cluster-a/tenant-x/svc-a//file.json").is_err());
    }

    #[test]
    fn environment_prefixes() {
        assert_eq!(
            parse_key("stg-east/t/a/p/f").unwrap().environment,
            Environment::Staging
        );
        assert_eq!(
            parse_key("dev-east/t/a/p/f").unwrap().environment,
            Environment::Development
        );
        assert_eq!(
            parse_key("prod-east/t/a/p/f").unwrap().environment,
            Environment::Production
        );
        assert_eq!(
            parse_key("unknown-east/t/a/p/f").unwrap().environment,
            Environment::Production
        );
    }

    proptest! {
        #[test]
        fn tenant_equals_second_segment(
            cluster in "[a-z0-9-]{1,10}",
            namespace in "[a-z0-9-]{1,10}",
            application in "[a-z0-9-]{1,10}",
            pod in "[a-z0-9-]{1,10}",
            file in "[a-z0-9.-]{1,10}",
        ) {
            let key = format!("{cluster}/{namespace}/{application}/{pod}/{file}");
            let info = parse_key(&key).unwrap();
            prop_assert_eq!(info.tenant, namespace);
        }
    }
}
