//! Workload reference parsing
//!
//! A reference names a cluster workload either as `<kind>/<name>` or as a bare
//! pod name. Parsing is total: malformed input becomes [`ResourceReference::Unrecognized`],
//! which downstream resolution treats as "no pod found" rather than an error.

use std::fmt;

/// A parsed workload reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceReference {
    /// A pod, either bare (`web-abc-xyz`) or prefixed (`pod/web-abc-xyz`)
    Pod(String),
    /// A deployment (`deployment/web`, `deploy/web`)
    Deployment(String),
    /// A replica set (`replicaset/web-abc`, `replicas/web-abc`)
    ReplicaSet(String),
    /// Anything with an unknown kind prefix or a missing name
    Unrecognized(String),
}

impl ResourceReference {
    /// Parse a reference string; never fails
    ///
    /// A bare name (no `/`) is treated as a pod name. Short and long kind
    /// aliases are accepted.
    pub fn parse(input: &str) -> Self {
        let Some((kind, name)) = input.split_once('/') else {
            return Self::Pod(input.to_string());
        };

        if name.is_empty() {
            return Self::Unrecognized(input.to_string());
        }

        match kind {
            "pod" => Self::Pod(name.to_string()),
            "deploy" | "deployment" => Self::Deployment(name.to_string()),
            "replicas" | "replicaset" => Self::ReplicaSet(name.to_string()),
            _ => Self::Unrecognized(input.to_string()),
        }
    }

    /// The workload name carried by this reference
    pub fn name(&self) -> &str {
        match self {
            Self::Pod(name) | Self::Deployment(name) | Self::ReplicaSet(name) => name,
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod(name) => write!(f, "pod/{}", name),
            Self::Deployment(name) => write!(f, "deployment/{}", name),
            Self::ReplicaSet(name) => write!(f, "replicaset/{}", name),
            Self::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a bare name is a pod name
    #[test]
    fn story_bare_name_is_a_pod() {
        assert_eq!(
            ResourceReference::parse("web-abc-xyz"),
            ResourceReference::Pod("web-abc-xyz".to_string())
        );
    }

    /// Story: short and long kind aliases parse to the same variant
    #[test]
    fn story_kind_aliases_are_equivalent() {
        assert_eq!(
            ResourceReference::parse("deploy/web"),
            ResourceReference::parse("deployment/web")
        );
        assert_eq!(
            ResourceReference::parse("replicas/web-abc"),
            ResourceReference::parse("replicaset/web-abc")
        );
        assert_eq!(
            ResourceReference::parse("pod/web-abc-xyz"),
            ResourceReference::Pod("web-abc-xyz".to_string())
        );
    }

    /// Story: unknown kinds and missing names never crash the parser
    #[test]
    fn story_malformed_input_is_unrecognized() {
        assert_eq!(
            ResourceReference::parse("daemonset/logger"),
            ResourceReference::Unrecognized("daemonset/logger".to_string())
        );
        assert_eq!(
            ResourceReference::parse("deployment/"),
            ResourceReference::Unrecognized("deployment/".to_string())
        );
    }

    /// Story: canonical display strings re-parse to the same reference
    ///
    /// Discovery output (`deployment/web`, ...) must be valid resolver input.
    #[test]
    fn story_display_round_trips_through_parse() {
        for input in ["deployment/web", "replicaset/web-abc", "pod/web-abc-xyz"] {
            let reference = ResourceReference::parse(input);
            assert_eq!(ResourceReference::parse(&reference.to_string()), reference);
        }
    }
}
