//! Stream routing policy tags.

use serde::{Deserialize, Serialize};

/// Routing policy declared by a stream through its `media.policy` property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StreamPolicy {
    #[default]
    Auto,
    AutoUhqa,
    Phone,
    All,
    Voip,
    HighLatency,
    HighLatencyUhqa,
    Mirroring,
    Loopback,
    FmRadio,
    /// Any tag this daemon has no rule for. Routed like `auto`.
    Other(String),
}

impl StreamPolicy {
    pub fn from_tag(tag: &str) -> StreamPolicy {
        match tag {
            "auto" => StreamPolicy::Auto,
            "auto-uhqa" => StreamPolicy::AutoUhqa,
            "phone" => StreamPolicy::Phone,
            "all" => StreamPolicy::All,
            "voip" => StreamPolicy::Voip,
            "high-latency" => StreamPolicy::HighLatency,
            "high-latency-uhqa" => StreamPolicy::HighLatencyUhqa,
            "mirroring" => StreamPolicy::Mirroring,
            "loopback" => StreamPolicy::Loopback,
            "fmradio" => StreamPolicy::FmRadio,
            other => StreamPolicy::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StreamPolicy::Auto => "auto",
            StreamPolicy::AutoUhqa => "auto-uhqa",
            StreamPolicy::Phone => "phone",
            StreamPolicy::All => "all",
            StreamPolicy::Voip => "voip",
            StreamPolicy::HighLatency => "high-latency",
            StreamPolicy::HighLatencyUhqa => "high-latency-uhqa",
            StreamPolicy::Mirroring => "mirroring",
            StreamPolicy::Loopback => "loopback",
            StreamPolicy::FmRadio => "fmradio",
            StreamPolicy::Other(tag) => tag,
        }
    }

    /// True for the policies that have a high-sample-rate variant.
    pub fn has_uhqa_variant(&self) -> bool {
        matches!(self, StreamPolicy::Auto | StreamPolicy::HighLatency)
    }

    /// The `-uhqa` variant of `auto` / `high-latency`, anything else unchanged.
    pub fn uhqa_variant(&self) -> StreamPolicy {
        match self {
            StreamPolicy::Auto => StreamPolicy::AutoUhqa,
            StreamPolicy::HighLatency => StreamPolicy::HighLatencyUhqa,
            other => other.clone(),
        }
    }

    pub fn is_uhqa(&self) -> bool {
        matches!(self, StreamPolicy::AutoUhqa | StreamPolicy::HighLatencyUhqa)
    }
}

impl std::fmt::Display for StreamPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in ["auto", "phone", "all", "voip", "high-latency", "mirroring", "loopback"] {
            assert_eq!(StreamPolicy::from_tag(tag).as_str(), tag);
        }
        assert_eq!(
            StreamPolicy::from_tag("custom"),
            StreamPolicy::Other("custom".to_string())
        );
    }

    #[test]
    fn test_uhqa_variant() {
        assert_eq!(StreamPolicy::Auto.uhqa_variant(), StreamPolicy::AutoUhqa);
        assert_eq!(
            StreamPolicy::HighLatency.uhqa_variant(),
            StreamPolicy::HighLatencyUhqa
        );
        assert_eq!(StreamPolicy::Phone.uhqa_variant(), StreamPolicy::Phone);
        assert!(StreamPolicy::AutoUhqa.is_uhqa());
    }
}
