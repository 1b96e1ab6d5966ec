use crate::{
    connection::DEFAULT_QUEUE_CAPACITY, hub::DEFAULT_INTAKE_CAPACITY,
    transport::DEFAULT_MAX_MESSAGE_SIZE,
};

/// Limits shared by every front end that admits clients into the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConfig {
    /// Outbound queue slots per client; a client whose queue is full when a
    /// message arrives gets evicted.
    pub queue_capacity: usize,
    /// Signals that may wait for the hub before submitters are held back.
    pub intake_capacity: usize,
    /// Largest message accepted from a client, in bytes.
    pub max_message_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
