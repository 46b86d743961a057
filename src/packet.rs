// Network and transport header parsing for captured L3 packets.
//
// Captured payloads carry no link-layer header: the layer 3 family comes from
// the event return value, and only the fields needed to size the recognized
// headers are decoded here. Nothing in this module mutates packet bytes.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// Return value bitmask
const FAMILY_IPV4: i64 = 1 << 0;
const FAMILY_IPV6: i64 = 1 << 1;

// BSD loopback (DLT_NULL) address family values
pub const NULL_AF_INET: u32 = 2;
pub const NULL_AF_INET6: u32 = 28;

// IPv4
pub const IPV4_MIN_HLEN: usize = 20;
pub const IPV4_TOTAL_LEN_OFFSET: usize = 2;
const IPV4_PROTO_OFFSET: usize = 9;

// IPv6
pub const IPV6_HLEN: usize = 40;
const IPV6_NEXT_HDR_OFFSET: usize = 6;

// L4 protocol numbers
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;

// L4 header lengths
pub const ICMP_HLEN: usize = 8;
pub const ICMPV6_HLEN: usize = 4;
pub const UDP_HLEN: usize = 8;
pub const TCP_MIN_HLEN: usize = 20;
pub const UDP_LEN_OFFSET: usize = 4;
const TCP_DATA_OFFSET_OFFSET: usize = 12;

// ---------------------------------------------------------------------------
// Network family
// ---------------------------------------------------------------------------

/// Layer 3 family of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFamily {
    Ipv4,
    Ipv6,
}

impl NetworkFamily {
    /// Decode the family from an event return value bitmask.
    ///
    /// The IPv4 bit wins when both bits are set.
    pub fn from_return_value(return_value: i64) -> Option<Self> {
        if return_value & FAMILY_IPV4 == FAMILY_IPV4 {
            Some(Self::Ipv4)
        } else if return_value & FAMILY_IPV6 == FAMILY_IPV6 {
            Some(Self::Ipv6)
        } else {
            None
        }
    }

    /// Address family value of the fake BSD loopback header.
    pub fn link_tag(self) -> u32 {
        match self {
            Self::Ipv4 => NULL_AF_INET,
            Self::Ipv6 => NULL_AF_INET6,
        }
    }
}

// ---------------------------------------------------------------------------
// Network header
// ---------------------------------------------------------------------------

/// The parts of a network header needed to rebuild length fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHeader {
    pub family: NetworkFamily,
    /// Header length in bytes (IHL * 4 for IPv4, 40 for IPv6).
    pub header_len: usize,
    /// IPv4 Protocol, or the Next Header of the fixed IPv6 header.
    pub next_protocol: u8,
}

/// Parse the network header at the start of `data`.
///
/// Returns `None` if the header is truncated or self-inconsistent.
pub fn parse_network_header(family: NetworkFamily, data: &[u8]) -> Option<NetworkHeader> {
    match family {
        NetworkFamily::Ipv4 => parse_ipv4_header(data),
        NetworkFamily::Ipv6 => parse_ipv6_header(data),
    }
}

fn parse_ipv4_header(data: &[u8]) -> Option<NetworkHeader> {
    if data.len() < IPV4_MIN_HLEN {
        return None;
    }

    let ihl = ((data[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HLEN || data.len() < ihl {
        return None;
    }

    // Zero total length is left by segmentation offload and is accepted.
    let total_len =
        u16::from_be_bytes([data[IPV4_TOTAL_LEN_OFFSET], data[IPV4_TOTAL_LEN_OFFSET + 1]]);
    if total_len != 0 && (total_len as usize) < ihl {
        return None;
    }

    Some(NetworkHeader {
        family: NetworkFamily::Ipv4,
        header_len: ihl,
        next_protocol: data[IPV4_PROTO_OFFSET],
    })
}

fn parse_ipv6_header(data: &[u8]) -> Option<NetworkHeader> {
    if data.len() < IPV6_HLEN {
        return None;
    }

    Some(NetworkHeader {
        family: NetworkFamily::Ipv6,
        header_len: IPV6_HLEN,
        next_protocol: data[IPV6_NEXT_HDR_OFFSET],
    })
}

// ---------------------------------------------------------------------------
// Transport header
// ---------------------------------------------------------------------------

/// Transport protocol following the network header, as far as capture
/// framing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Icmp,
    Icmpv6,
    Udp,
    /// TCP with its header length in bytes.
    Tcp { header_len: usize },
    Other(u8),
}

impl Transport {
    /// Classify the transport that follows `net`, given the bytes after the
    /// network header.
    ///
    /// ICMP is only recognized inside IPv4 and ICMPv6 only inside IPv6.
    pub fn classify(net: &NetworkHeader, l4_data: &[u8]) -> Self {
        match (net.family, net.next_protocol) {
            (NetworkFamily::Ipv4, PROTO_ICMP) => Self::Icmp,
            (NetworkFamily::Ipv6, PROTO_ICMPV6) => Self::Icmpv6,
            (_, PROTO_UDP) => Self::Udp,
            (_, PROTO_TCP) => Self::Tcp {
                header_len: tcp_header_len(l4_data),
            },
            (_, other) => Self::Other(other),
        }
    }

    /// Header length counted towards the capture target size.
    pub fn header_len(self) -> usize {
        match self {
            Self::Icmp => ICMP_HLEN,
            Self::Icmpv6 => ICMPV6_HLEN,
            Self::Udp => UDP_HLEN,
            Self::Tcp { header_len } => header_len,
            Self::Other(_) => 0,
        }
    }
}

/// TCP header length from the data offset field.
///
/// Data offsets up to 5 mean the 20-byte default header. A TCP header with
/// fewer than 20 captured bytes has no readable offset and also counts as 20.
pub fn tcp_header_len(l4_data: &[u8]) -> usize {
    if l4_data.len() < TCP_MIN_HLEN {
        return TCP_MIN_HLEN;
    }
    let doff = (l4_data[TCP_DATA_OFFSET_OFFSET] >> 4) as usize;
    if doff > 5 { doff * 4 } else { TCP_MIN_HLEN }
}

// ===========================================================================
// Unit tests
// ===========================================================================
