use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::{bail, Result};

/// One network block, e.g. `1.1.1.0/30`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: IpAddr,
    pub len: u8,
}

impl Cidr {
    pub fn family(&self) -> i64 {
        match self.addr {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    /// Parses `addr/len`; a bare address is a host route.
    pub fn parse(value: &str) -> Result<Self> {
        let (addr, len) = match value.trim().split_once('/') {
            Some((addr, len)) => (addr.parse::<IpAddr>()?, Some(len.parse::<u8>()?)),
            None => (value.trim().parse::<IpAddr>()?, None),
        };
        let width = width(&addr);
        let len = len.unwrap_or(width);
        if len > width {
            bail!("prefix length {len} is too long for {addr}");
        }
        Ok(Self { addr, len })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

fn width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(*v4)),
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn from_bits(bits: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

// number of addresses in a block of `host_bits`, minus one
fn span(host_bits: u32) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

/// Smallest set of CIDR blocks covering `start..=end` exactly, in address
/// order. DB-IP publishes ranges like `1.1.1.18 - 1.1.1.50`, which need
/// several blocks.
pub fn range_to_cidrs(start: IpAddr, end: IpAddr) -> Result<Vec<Cidr>> {
    let v4 = match (&start, &end) {
        (IpAddr::V4(_), IpAddr::V4(_)) => true,
        (IpAddr::V6(_), IpAddr::V6(_)) => false,
        _ => bail!("range {start} - {end} mixes address families"),
    };
    let width = u32::from(width(&start));
    let (mut low, high) = (to_bits(&start), to_bits(&end));
    if low > high {
        bail!("range start {start} is after end {end}");
    }

    let mut blocks = Vec::new();
    loop {
        // alignment of `low` caps the block size, the remaining range caps it further
        let mut host_bits = if low == 0 {
            width
        } else {
            low.trailing_zeros().min(width)
        };
        while span(host_bits) > high - low {
            host_bits -= 1;
        }

        blocks.push(Cidr {
            addr: from_bits(low, v4),
            len: (width - host_bits) as u8,
        });

        match low.checked_add(span(host_bits)).and_then(|last| last.checked_add(1)) {
            Some(next) if next <= high => low = next,
            _ => break,
        }
    }

    Ok(blocks)
}
