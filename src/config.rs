use anyhow::bail;
use crate::util::sequence::SequenceNumber;

/// Tunable parameters of a [crate::socket::Socket]. The socket clones its config on construction,
///  so changing a config object afterwards has no effect on sockets that were created from it.
///
/// All durations are in milliseconds unless stated otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct RudpConfig {
    /// The MTU for new connections, in bytes
    pub default_mtu: usize,
    pub mtu_min: usize,
    pub mtu_max: usize,

    /// initial estimate of a new connection's network round trip time, in seconds
    pub default_network_ping: f32,
    /// initial estimate of a new connection's total round trip time, in seconds
    pub default_aliased_ping: f32,
    pub default_always_send_mtu: bool,

    /// If this is `true`, packets that overflow the connection's MTU are sent anyway (and
    ///  truncated to the backing buffer). If it is `false`, such a send fails with
    ///  [crate::event::SendFailReason::StreamOverflow].
    pub allow_packet_overflow: bool,

    /// upper bound for the 'ack time' sent in each packet header
    pub max_ping: u32,

    pub connect_request_timeout: u64,
    pub connect_request_attempts: u32,

    /// a connection is dropped if nothing was received for this long
    pub connection_timeout: u64,
    /// a ping is sent if nothing was sent for this long
    pub ping_timeout: u64,
    /// a ping is sent after receiving this many packets without sending anything, forcing an ack
    pub recv_without_ack_limit: u32,

    /// Probability for dropping a received packet, for simulating packet loss. 0.0 switches this
    ///  off. This applies in release builds as well, so production configs should leave it at 0.0.
    pub simulated_loss: f32,
    pub simulated_loss_seed: u64,

    /// This is the maximum number of packets that can be 'in flight' on a connection, i.e. sent
    ///  but neither acknowledged nor reported as lost. Exceeding it forcefully disconnects the
    ///  connection.
    ///
    /// NB: must be a power of two
    pub packet_window: usize,

    /// `None` means 'unlimited'
    pub connection_limit: Option<usize>,
    pub allow_incoming_connections: bool,
    pub auto_accept_incoming_connections: bool,

    /// Adds a 16 bit 'ack time' field to every packet header, allowing the peer to separate
    ///  network RTT from processing delays
    pub calculate_network_ping: bool,
    /// Adds a 16 bit payload length (in bits) field to every packet header
    pub write_packet_bit_size: bool,

    /// If this is `true`, an initiating connection that receives regular traffic from the peer
    ///  while still waiting for the 'accepted' command treats the connection as accepted.
    ///
    /// NB: This trades robustness against a lost 'accepted' command for accepting stray
    ///      traffic as a handshake
    pub allow_implicit_accept: bool,

    /// number of bits in the ack history bitfield, 1..=64
    pub ack_redundancy: u32,

    pub initial_event_queue_size: usize,
}

impl Default for RudpConfig {
    fn default() -> Self {
        RudpConfig {
            default_mtu: 512,
            mtu_min: 128,
            mtu_max: 2048,
            default_network_ping: 0.1,
            default_aliased_ping: 0.15,
            default_always_send_mtu: false,
            allow_packet_overflow: false,
            max_ping: 4000,
            connect_request_timeout: 1000,
            connect_request_attempts: 5,
            connection_timeout: 5000,
            ping_timeout: 100,
            recv_without_ack_limit: 8,
            simulated_loss: 0.0,
            simulated_loss_seed: 500,
            packet_window: 256,
            connection_limit: Some(64),
            allow_incoming_connections: true,
            auto_accept_incoming_connections: true,
            calculate_network_ping: true,
            write_packet_bit_size: true,
            allow_implicit_accept: true,
            ack_redundancy: 64,
            initial_event_queue_size: 4096,
        }
    }
}

impl RudpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu_min < 16 {
            bail!("minimum MTU is too small: {}", self.mtu_min);
        }
        if self.mtu_min > self.mtu_max {
            bail!("minimum MTU {} is bigger than maximum MTU {}", self.mtu_min, self.mtu_max);
        }
        if self.default_mtu < self.mtu_min || self.default_mtu > self.mtu_max {
            bail!("default MTU {} is outside of [{}, {}]", self.default_mtu, self.mtu_min, self.mtu_max);
        }
        if self.ack_redundancy == 0 || self.ack_redundancy > 64 {
            bail!("ack redundancy must be between 1 and 64 bits, was {}", self.ack_redundancy);
        }
        if !self.packet_window.is_power_of_two() || self.packet_window < 2 {
            bail!("packet window must be a power of two, was {}", self.packet_window);
        }
        if self.packet_window > SequenceNumber::HALF_RANGE as usize {
            bail!("packet window {} exceeds half the sequence number range", self.packet_window);
        }
        if !(0.0..=1.0).contains(&self.simulated_loss) {
            bail!("simulated loss must be between 0.0 and 1.0, was {}", self.simulated_loss);
        }
        if self.connect_request_attempts == 0 {
            bail!("at least one connect request attempt is required");
        }
        if self.header_bits() >= self.mtu_min * 8 {
            bail!("packet header does not fit into the minimum MTU");
        }
        Ok(())
    }

    /// size of the packet header for this configuration - see [crate::packet_header::PacketHeader]
    pub fn header_bits(&self) -> usize {
        crate::packet_header::PacketHeader::serialized_bits(self)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        RudpConfig::default().validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = RudpConfig::default();
        assert_eq!(config.default_mtu, 512);
        assert_eq!((config.mtu_min, config.mtu_max), (128, 2048));
        assert_eq!(config.connect_request_attempts, 5);
        assert_eq!(config.connect_request_timeout, 1000);
        assert_eq!(config.connection_timeout, 5000);
        assert_eq!(config.ping_timeout, 100);
        assert_eq!(config.max_ping, 4000);
        assert_eq!(config.ack_redundancy, 64);
        assert_eq!(config.packet_window, 256);
        assert_eq!(config.connection_limit, Some(64));
        assert!(config.auto_accept_incoming_connections);
        assert!(config.allow_implicit_accept);
        assert!(config.calculate_network_ping);
        assert!(config.write_packet_bit_size);
        assert_eq!(config.simulated_loss, 0.0);
    }

    #[rstest]
    #[case::mtu_min_too_small(RudpConfig { mtu_min: 8, ..Default::default() })]
    #[case::mtu_bounds_inverted(RudpConfig { mtu_min: 1024, mtu_max: 512, default_mtu: 512, ..Default::default() })]
    #[case::default_mtu_too_big(RudpConfig { default_mtu: 4096, ..Default::default() })]
    #[case::default_mtu_too_small(RudpConfig { default_mtu: 64, ..Default::default() })]
    #[case::ack_redundancy_zero(RudpConfig { ack_redundancy: 0, ..Default::default() })]
    #[case::ack_redundancy_too_big(RudpConfig { ack_redundancy: 65, ..Default::default() })]
    #[case::window_not_pow2(RudpConfig { packet_window: 100, ..Default::default() })]
    #[case::window_too_big(RudpConfig { packet_window: 32768, ..Default::default() })]
    #[case::loss_negative(RudpConfig { simulated_loss: -0.1, ..Default::default() })]
    #[case::loss_too_big(RudpConfig { simulated_loss: 1.5, ..Default::default() })]
    #[case::no_attempts(RudpConfig { connect_request_attempts: 0, ..Default::default() })]
    fn test_validate_invalid(#[case] config: RudpConfig) {
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::all_fields(RudpConfig::default(), 16+16+64+16+16)]
    #[case::no_ping(RudpConfig { calculate_network_ping: false, ..Default::default() }, 16+16+64+16)]
    #[case::no_bit_size(RudpConfig { write_packet_bit_size: false, ..Default::default() }, 16+16+64+16)]
    #[case::minimal(RudpConfig { calculate_network_ping: false, write_packet_bit_size: false, ack_redundancy: 8, ..Default::default() }, 16+16+8)]
    fn test_header_bits(#[case] config: RudpConfig, #[case] expected: usize) {
        assert_eq!(config.header_bits(), expected);
    }
}
