/// Tags a session with the kind of traffic it carries. The tag decides
/// whether payloads are compressed and byte-obfuscated, and how wide the
/// application opcode embedded in each data packet is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StreamType {
    /// Login/gateway traffic: single-byte application opcodes, plaintext
    Login,
    /// Zone/world traffic: two-byte application opcodes, compressed and
    /// obfuscated
    Zone,
}

/// Ports at or above this are assumed to serve zone traffic
const ZONE_PORT_FLOOR: u16 = 44400;

impl StreamType {
    /// Port heuristic used when a session-open request arrives on a socket
    /// whose purpose was not configured explicitly.
    pub fn for_port(port: u16) -> Self {
        if port >= ZONE_PORT_FLOOR {
            StreamType::Zone
        } else {
            StreamType::Login
        }
    }

    pub fn compressed(self) -> bool {
        match self {
            StreamType::Login => false,
            StreamType::Zone => true,
        }
    }

    pub fn obfuscated(self) -> bool {
        match self {
            StreamType::Login => false,
            StreamType::Zone => true,
        }
    }

    /// Width in bytes of the application opcode at the front of each
    /// application packet
    pub fn opcode_width(self) -> usize {
        match self {
            StreamType::Login => 1,
            StreamType::Zone => 2,
        }
    }
}

#[cfg(test)]
mod stream_type_tests {
    use super::StreamType;

    #[test]
    fn low_ports_are_login() {
        assert_eq!(StreamType::for_port(9000), StreamType::Login);
    }

    #[test]
    fn high_ports_are_zone() {
        assert_eq!(StreamType::for_port(44462), StreamType::Zone);
    }

    #[test]
    fn zone_streams_are_protected() {
        assert!(StreamType::Zone.compressed());
        assert!(StreamType::Zone.obfuscated());
        assert_eq!(StreamType::Zone.opcode_width(), 2);
    }

    #[test]
    fn login_streams_are_plain() {
        assert!(!StreamType::Login.compressed());
        assert!(!StreamType::Login.obfuscated());
        assert_eq!(StreamType::Login.opcode_width(), 1);
    }
}
