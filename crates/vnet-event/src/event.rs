use vnet_core::{VnetError, VnetResult};

pub const EVENT_CLASS_UPLINK: u32 = 0x1;
pub const EVENT_CLASS_BRIDGE: u32 = 0x2;

pub const EVENT_TYPE_LINK_STATE: u32 = 0;

/// Fixed event header. Serialized as five little-endian `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Total serialized size, header included.
    pub size: u32,
    pub sender_id: u32,
    pub event_id: u32,
    pub class_set: u32,
    pub event_type: u32,
}

impl EventHeader {
    pub const SIZE: usize = 20;

    fn write(&self, out: &mut Vec<u8>) {
        for word in [self.size, self.sender_id, self.event_id, self.class_set, self.event_type] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    fn read(buf: &[u8]) -> VnetResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(VnetError::InvalidArgument("event header truncated"));
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            size: word(0),
            sender_id: word(4),
            event_id: word(8),
            class_set: word(12),
            event_type: word(16),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    LinkState { adapter: u32, up: bool },
    /// Body of an event type this crate does not interpret.
    Opaque(Vec<u8>),
}

impl EventBody {
    const LINK_STATE_LEN: usize = 8;

    fn encoded_len(&self) -> usize {
        match self {
            EventBody::LinkState { .. } => Self::LINK_STATE_LEN,
            EventBody::Opaque(bytes) => bytes.len(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            EventBody::LinkState { adapter, up } => {
                out.extend_from_slice(&adapter.to_le_bytes());
                out.push(u8::from(*up));
                out.extend_from_slice(&[0u8; 3]);
            }
            EventBody::Opaque(bytes) => out.extend_from_slice(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub header: EventHeader,
    pub body: EventBody,
}

impl Event {
    pub fn new(sender_id: u32, event_id: u32, class_set: u32, event_type: u32, body: EventBody) -> Self {
        let size = (EventHeader::SIZE + body.encoded_len()) as u32;
        Self {
            header: EventHeader { size, sender_id, event_id, class_set, event_type },
            body,
        }
    }

    /// Link-state event for `adapter`. The adapter doubles as the event id,
    /// so each adapter's latest state is buffered separately.
    pub fn link_state(sender_id: u32, class_set: u32, adapter: u32, up: bool) -> Self {
        Self::new(
            sender_id,
            adapter,
            class_set,
            EVENT_TYPE_LINK_STATE,
            EventBody::LinkState { adapter, up },
        )
    }

    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.header.write(&mut out);
        self.body.write(&mut out);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> VnetResult<Self> {
        let header = EventHeader::read(buf)?;
        let size = header.size as usize;
        if size < EventHeader::SIZE || buf.len() < size {
            return Err(VnetError::InvalidArgument("event size field out of range"));
        }
        let payload = &buf[EventHeader::SIZE..size];
        let body = if header.event_type == EVENT_TYPE_LINK_STATE {
            if payload.len() < EventBody::LINK_STATE_LEN {
                return Err(VnetError::InvalidArgument("link state event truncated"));
            }
            EventBody::LinkState {
                adapter: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                up: payload[4] != 0,
            }
        } else {
            EventBody::Opaque(payload.to_vec())
        };
        Ok(Self { header, body })
    }
}
