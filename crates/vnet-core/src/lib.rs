#![forbid(unsafe_code)]

pub mod filter;
pub mod packet;

pub use filter::{ladrf_hash, matches, ExactFilter, IfFlags, Ladrf};
pub use packet::{MacAddr, Packet};

// Ethernet framing
pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const ETH_VLAN_HLEN: usize = 18;
pub const ETH_MIN_FRAME_LEN: usize = ETH_HLEN;

/// Largest frame a port accepts on write or holds in a queue. Leaves room
/// for a full-MTU frame carrying an 802.1Q tag.
pub const MAX_QUEUED_FRAME_LEN: usize = 1600;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_RARP: u16 = 0x8035;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_EAPOL: u16 = 0x888E;

// Reference sizing
pub const HUB_PORTS: usize = 68;
pub const USERIF_QUEUE_LEN: usize = 1024;
pub const BRIDGE_HISTORY_LEN: usize = 48;

/// OUI used for synthetic host-only adapters.
pub const VMX_OUI: [u8; 3] = [0x00, 0x50, 0x56];

pub type VnetResult<T> = Result<T, VnetError>;

#[derive(Debug, thiserror::Error)]
pub enum VnetError {
    #[error("connection would create a cycle")]
    Cycle,
    #[error("peer is missing or already connected")]
    PeerInvalid,
    #[error("host device '{0}' not found")]
    DeviceNotFound(String),
    #[error("host device '{0}' is not an Ethernet device")]
    NotEthernet(String),
    #[error("host device '{0}' is down")]
    DeviceDown(String),
    #[error("operation re-entered from an event handler")]
    Busy,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("frame of {0} bytes is outside the accepted size range")]
    FrameSize(usize),
    #[error("frame of {needed} bytes does not fit in a {capacity} byte buffer")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("hardware address {0} is already in use")]
    AddressInUse(MacAddr),
    #[error("wait interrupted")]
    Interrupted,
    #[error("hub has no free slots")]
    HubFull,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
