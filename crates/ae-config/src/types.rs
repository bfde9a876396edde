use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration written the way alert rules spell it: `"30s"`, `"5m"`,
/// `"1h30m"`, `"250ms"`, `"2d"`.
///
/// Components must appear in descending unit order and each unit at most
/// once, so `"1m30s"` parses but `"30s1m"` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub const ZERO: HumanDuration = HumanDuration(Duration::ZERO);

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

/// Units in descending order; `ms` must be tried before `m`.
const UNITS: &[(&str, u64)] = &[
    ("d", 86_400_000),
    ("h", 3_600_000),
    ("ms", 1),
    ("m", 60_000),
    ("s", 1_000),
];

fn unit_rank(suffix: &str) -> usize {
    match suffix {
        "d" => 0,
        "h" => 1,
        "m" => 2,
        "s" => 3,
        _ => 4,
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty duration string");
        }
        if s == "0" {
            return Ok(Self::ZERO);
        }

        let mut rest = s;
        let mut total_ms: u64 = 0;
        let mut last_rank: Option<usize> = None;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| anyhow::anyhow!("missing unit suffix in {s:?}"))?;
            if digits == 0 {
                anyhow::bail!("missing numeric part in {s:?}");
            }
            let value: u64 = rest[..digits]
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid number in duration: {s:?}"))?;
            rest = &rest[digits..];

            let (suffix, factor) = UNITS
                .iter()
                .find(|(suffix, _)| rest.starts_with(suffix))
                .ok_or_else(|| {
                    anyhow::anyhow!("unsupported duration unit in {s:?} (expected ms/s/m/h/d)")
                })?;
            rest = &rest[suffix.len()..];

            let rank = unit_rank(suffix);
            if last_rank.is_some_and(|prev| rank <= prev) {
                anyhow::bail!("duration units out of order in {s:?}");
            }
            last_rank = Some(rank);

            total_ms = value
                .checked_mul(*factor)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| anyhow::anyhow!("duration overflow in {s:?}"))?;
        }

        Ok(Self(Duration::from_millis(total_ms)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ms = self.0.as_millis();
        if ms == 0 {
            return write!(f, "0s");
        }
        for (suffix, factor) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)] {
            let n = ms / factor;
            if n > 0 {
                write!(f, "{n}{suffix}")?;
                ms -= n * factor;
            }
        }
        Ok(())
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        let d: HumanDuration = "30s".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(30));
        let d: HumanDuration = "5m".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(300));
        let d: HumanDuration = "250ms".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_millis(250));
        let d: HumanDuration = "2d".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(2 * 86400));
    }

    #[test]
    fn compound_duration() {
        let d: HumanDuration = "1h30m".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(5400));
        assert_eq!(d.to_string(), "1h30m");
    }

    #[test]
    fn display_normalises() {
        let d: HumanDuration = "90s".parse().unwrap();
        assert_eq!(d.to_string(), "1m30s");
        assert_eq!(HumanDuration::ZERO.to_string(), "0s");
    }

    #[test]
    fn bare_zero_is_allowed() {
        let d: HumanDuration = "0".parse().unwrap();
        assert!(d.is_zero());
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("30".parse::<HumanDuration>().is_err());
        assert!("30x".parse::<HumanDuration>().is_err());
        assert!("s".parse::<HumanDuration>().is_err());
        assert!("30s1m".parse::<HumanDuration>().is_err());
        assert!("1m1m".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let d: HumanDuration = "1m".parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"1m\"");
        let back: HumanDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
