//! Port specifications for TCP and UDP services.
//!
//! A specification is a single port (`22`), a range (`6000:6010`, `-` is
//! accepted as separator too) or a comma-separated set of either.

use std::fmt;
use std::str::FromStr;

/// Port slots the iptables `multiport` match accepts. A range takes two.
pub const MULTIPORT_MAX: usize = 15;

/// An inclusive port range. A single port has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRange {
    /// First port.
    pub start: u16,
    /// Last port (inclusive).
    pub end: u16,
}

/// A parsed, non-empty list of port ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortSpec {
    ranges: Vec<PortRange>,
}

impl PortRange {
    /// Creates a range covering a single port.
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Returns true if this range covers exactly one port.
    #[must_use]
    pub const fn is_single(&self) -> bool {
        self.start == self.end
    }
}

impl PortSpec {
    /// Returns the ranges in declaration order.
    #[must_use]
    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// Returns true if the spec is one port or one range.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.ranges.len() == 1
    }

    /// Multiport slots this spec needs; a range counts as two.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.ranges
            .iter()
            .map(|r| if r.is_single() { 1 } else { 2 })
            .sum()
    }

    fn parse_port(s: &str) -> Result<u16, String> {
        let port: u16 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a port number", s.trim()))?;
        if port == 0 {
            return Err(String::from("port 0 is not allowed"));
        }
        Ok(port)
    }

    fn parse_range(item: &str) -> Result<PortRange, String> {
        let item = item.trim();
        if item.is_empty() {
            return Err(String::from("empty port entry"));
        }

        match item.split_once([':', '-']) {
            Some((lo, hi)) => {
                let start = Self::parse_port(lo)?;
                let end = Self::parse_port(hi)?;
                if start > end {
                    return Err(format!("range {start}:{end} is reversed"));
                }
                Ok(PortRange { start, end })
            }
            None => Ok(PortRange::single(Self::parse_port(item)?)),
        }
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(String::from("empty port specification"));
        }

        let ranges = s
            .split(',')
            .map(Self::parse_range)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { ranges })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}
