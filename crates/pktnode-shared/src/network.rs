//! Network input validation and the immutable node configuration snapshot.
//!
//! All checks run before any operation touches the host or the guest, so a
//! rejected value never leaves side effects behind.

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use thiserror::Error;

/// Prefix every node peer id starts with
pub const PEER_ID_PREFIX: &str = "PUB_PKT_";

/// Prefix length used when neither the address nor a subnet mask carries one
pub const DEFAULT_PREFIX: u8 = 24;

/// Validation failures, each naming the offending field or entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Static IP address is required.")]
    StaticIpRequired,

    #[error("Invalid IP address: {0}. Please use format: XXX.XXX.XXX.XXX (e.g., 192.168.1.100).")]
    InvalidStaticIp(String),

    #[error("Invalid prefix length: {0}. Must be between 0 and 32.")]
    InvalidPrefix(String),

    #[error("Subnet mask is required.")]
    SubnetMaskRequired,

    #[error("Invalid subnet mask format: {0}. Please use format: XXX.XXX.XXX.XXX (e.g., 255.255.255.0).")]
    InvalidSubnetMask(String),

    #[error("Invalid subnet mask: {0}. Must be a valid network mask (e.g., 255.255.255.0, 255.255.0.0).")]
    NonContiguousMask(String),

    #[error("Gateway is required.")]
    GatewayRequired,

    #[error("Invalid gateway IP address: {0}. Please use format: XXX.XXX.XXX.XXX (e.g., 192.168.1.1).")]
    InvalidGateway(String),

    #[error("At least one DNS server is required.")]
    DnsRequired,

    #[error("Invalid DNS server IP address: {0}. Please use format: XXX.XXX.XXX.XXX.")]
    InvalidDnsServer(String),

    #[error("CJDNS port must be a valid port number (1-65535), got: {0}")]
    InvalidPort(String),

    #[error("Invalid peer id: {0}. Expected 'PUB_PKT_' followed by digits.")]
    InvalidPeerId(String),

    #[error("Username is required.")]
    UsernameRequired,

    #[error("Invalid username: {0}. Use lowercase letters, digits, '-' or '_' (max 32).")]
    InvalidUsername(String),

    #[error("Password is required.")]
    PasswordRequired,
}

static IPV4_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap());

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").unwrap());

/// Parse a strict dotted-quad IPv4 literal. Surrounding whitespace is ignored.
pub fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let caps = IPV4_PATTERN.captures(s.trim())?;
    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        let value: u16 = caps.get(i + 1)?.as_str().parse().ok()?;
        *octet = u8::try_from(value).ok()?;
    }
    Some(Ipv4Addr::from(octets))
}

/// Validate a static address, optionally in `a.b.c.d/nn` form.
pub fn validate_static_ip(s: &str) -> Result<(Ipv4Addr, Option<u8>), ValidationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ValidationError::StaticIpRequired);
    }
    let (addr_part, prefix_part) = match s.split_once('/') {
        Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
        None => (s, None),
    };
    let addr =
        parse_ipv4(addr_part).ok_or_else(|| ValidationError::InvalidStaticIp(addr_part.to_string()))?;
    let prefix = match prefix_part {
        None => None,
        Some(p) => {
            let value: u8 = p
                .parse()
                .map_err(|_| ValidationError::InvalidPrefix(p.to_string()))?;
            if value > 32 {
                return Err(ValidationError::InvalidPrefix(p.to_string()));
            }
            Some(value)
        }
    };
    Ok((addr, prefix))
}

/// Validate a subnet mask: a valid IPv4 literal whose bits are contiguous ones.
pub fn validate_subnet_mask(s: &str) -> Result<Ipv4Addr, ValidationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ValidationError::SubnetMaskRequired);
    }
    let mask = parse_ipv4(s).ok_or_else(|| ValidationError::InvalidSubnetMask(s.to_string()))?;
    let inverted = !u32::from(mask);
    if inverted & inverted.wrapping_add(1) != 0 {
        return Err(ValidationError::NonContiguousMask(s.to_string()));
    }
    Ok(mask)
}

/// Prefix length of a validated mask (count of leading ones).
pub fn mask_to_prefix(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

pub fn validate_gateway(s: &str) -> Result<Ipv4Addr, ValidationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ValidationError::GatewayRequired);
    }
    parse_ipv4(s).ok_or_else(|| ValidationError::InvalidGateway(s.to_string()))
}

/// Parse a comma separated DNS server list into an ordered set.
///
/// Blank entries are skipped, duplicates keep their first position, and the
/// first invalid entry is named in the error.
pub fn parse_dns_servers(s: &str) -> Result<Vec<Ipv4Addr>, ValidationError> {
    let mut servers: Vec<Ipv4Addr> = Vec::new();
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let addr =
            parse_ipv4(entry).ok_or_else(|| ValidationError::InvalidDnsServer(entry.to_string()))?;
        if !servers.contains(&addr) {
            servers.push(addr);
        }
    }
    if servers.is_empty() {
        return Err(ValidationError::DnsRequired);
    }
    Ok(servers)
}

pub fn validate_cjdns_port(s: &str) -> Result<u16, ValidationError> {
    let s = s.trim();
    match s.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ValidationError::InvalidPort(s.to_string())),
    }
}

pub fn validate_peer_id(s: &str) -> Result<String, ValidationError> {
    let s = s.trim();
    let suffix = s
        .strip_prefix(PEER_ID_PREFIX)
        .ok_or_else(|| ValidationError::InvalidPeerId(s.to_string()))?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidPeerId(s.to_string()));
    }
    Ok(s.to_string())
}

pub fn validate_username(s: &str) -> Result<String, ValidationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ValidationError::UsernameRequired);
    }
    if !USERNAME_PATTERN.is_match(s) {
        return Err(ValidationError::InvalidUsername(s.to_string()));
    }
    Ok(s.to_string())
}

/// Static address with its prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddress {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl std::fmt::Display for StaticAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Immutable snapshot handed to the deployment pipeline and the network
/// configurator. Neither of them mutates it.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeConfiguration {
    pub username: String,
    pub password: String,
    pub peer_id: Option<String>,
    pub cjdns_port: Option<u16>,
    /// Absent when the user has not chosen an address yet. Deployment and
    /// reconfiguration refuse to proceed without one.
    pub static_ip: Option<StaticAddress>,
    pub gateway: Ipv4Addr,
    pub dns_servers: Vec<Ipv4Addr>,
}

impl std::fmt::Debug for NodeConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfiguration")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("peer_id", &self.peer_id)
            .field("cjdns_port", &self.cjdns_port)
            .field("static_ip", &self.static_ip)
            .field("gateway", &self.gateway)
            .field("dns_servers", &self.dns_servers)
            .finish()
    }
}

impl NodeConfiguration {
    pub fn builder() -> NodeConfigurationBuilder {
        NodeConfigurationBuilder::default()
    }

    pub fn require_static_ip(&self) -> Result<StaticAddress, ValidationError> {
        self.static_ip.ok_or(ValidationError::StaticIpRequired)
    }

    /// DNS servers joined the way the network file lists them
    pub fn dns_list(&self) -> String {
        self.dns_servers
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Collects raw user input and validates it in one pass
#[derive(Debug, Default, Clone)]
pub struct NodeConfigurationBuilder {
    username: String,
    password: String,
    peer_id: String,
    cjdns_port: String,
    static_ip: String,
    subnet_mask: String,
    gateway: String,
    dns_servers: String,
}

impl NodeConfigurationBuilder {
    pub fn username(mut self, v: &str) -> Self {
        self.username = v.to_string();
        self
    }

    pub fn password(mut self, v: &str) -> Self {
        self.password = v.to_string();
        self
    }

    pub fn peer_id(mut self, v: &str) -> Self {
        self.peer_id = v.to_string();
        self
    }

    pub fn cjdns_port(mut self, v: &str) -> Self {
        self.cjdns_port = v.to_string();
        self
    }

    pub fn static_ip(mut self, v: &str) -> Self {
        self.static_ip = v.to_string();
        self
    }

    pub fn subnet_mask(mut self, v: &str) -> Self {
        self.subnet_mask = v.to_string();
        self
    }

    pub fn gateway(mut self, v: &str) -> Self {
        self.gateway = v.to_string();
        self
    }

    pub fn dns_servers(mut self, v: &str) -> Self {
        self.dns_servers = v.to_string();
        self
    }

    /// Validate every field. An empty static IP, peer id or port means "not
    /// supplied". The prefix comes from the address, else the subnet mask,
    /// else 24. A supplied mask is validated even when the address
    /// carries its own prefix.
    pub fn build(self) -> Result<NodeConfiguration, ValidationError> {
        let username = validate_username(&self.username)?;
        if self.password.is_empty() {
            return Err(ValidationError::PasswordRequired);
        }
        let mask_prefix = if self.subnet_mask.trim().is_empty() {
            None
        } else {
            Some(mask_to_prefix(validate_subnet_mask(&self.subnet_mask)?))
        };
        let static_ip = if self.static_ip.trim().is_empty() {
            None
        } else {
            let (addr, explicit_prefix) = validate_static_ip(&self.static_ip)?;
            let prefix = explicit_prefix.or(mask_prefix).unwrap_or(DEFAULT_PREFIX);
            Some(StaticAddress { addr, prefix })
        };
        let gateway = validate_gateway(&self.gateway)?;
        let dns_servers = parse_dns_servers(&self.dns_servers)?;
        let peer_id = if self.peer_id.trim().is_empty() {
            None
        } else {
            Some(validate_peer_id(&self.peer_id)?)
        };
        let cjdns_port = if self.cjdns_port.trim().is_empty() {
            None
        } else {
            Some(validate_cjdns_port(&self.cjdns_port)?)
        };

        Ok(NodeConfiguration {
            username,
            password: self.password,
            peer_id,
            cjdns_port,
            static_ip,
            gateway,
            dns_servers,
        })
    }
}
