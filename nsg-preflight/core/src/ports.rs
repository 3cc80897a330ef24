use crate::rule::ParseError;
use serde::Serialize;
use std::{fmt, num::NonZeroU16};

/// An inclusive range of destination ports.
///
/// A rule without a range is unrestricted, which is equivalent to [`PortRange::ALL`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PortRange {
    min: NonZeroU16,
    max: NonZeroU16,
}

// === impl PortRange ===

impl PortRange {
    pub const ALL: Self = Self {
        min: NonZeroU16::MIN,
        max: NonZeroU16::MAX,
    };

    pub fn new(min: u16, max: u16) -> Result<Self, ParseError> {
        let min = NonZeroU16::new(min).ok_or(ParseError::ZeroPort)?;
        let max = NonZeroU16::new(max).ok_or(ParseError::ZeroPort)?;
        if min > max {
            return Err(ParseError::DecreasingPortRange {
                min: min.get(),
                max: max.get(),
            });
        }
        Ok(Self { min, max })
    }

    pub fn single(port: NonZeroU16) -> Self {
        Self {
            min: port,
            max: port,
        }
    }

    #[inline]
    pub fn min(&self) -> u16 {
        self.min.get()
    }

    #[inline]
    pub fn max(&self) -> u16 {
        self.max.get()
    }

    /// Returns true if every port in `other` is also in this range.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min <= other.min && self.max >= other.max
    }

    pub fn is_all(&self) -> bool {
        *self == Self::ALL
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl std::str::FromStr for PortRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_port_range(s)
    }
}

/// Reads a single port (`443`) or an inclusive port range (`30000-32767`).
pub fn parse_port_range(s: &str) -> Result<PortRange, ParseError> {
    let parse = |p: &str| {
        p.trim()
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPort(p.trim().to_string()))
    };

    match s.split_once('-') {
        None => {
            let port = parse(s)?;
            PortRange::new(port, port)
        }
        Some((floor, ceil)) => PortRange::new(parse(floor)?, parse(ceil)?),
    }
}
