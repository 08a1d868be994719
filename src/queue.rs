//! Wavetable Load Queue
//!
//! Wavetable changes are requested from a non-real-time thread and handed to
//! the audio path through a bounded single-producer/single-consumer ring
//! buffer. Messages are small and fixed-size so nothing allocates on either
//! side once the queue exists. The consumer drains at most once per block and
//! never blocks; a full queue rejects the request on the producer side.

use crate::error::{EngineError, Result};
use crate::tables::SharedTables;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Longest name carried by a message
pub const WAVETABLE_NAME_LEN: usize = 256;

/// A request to load a catalog wavetable, by index or by name
#[derive(Clone, Copy)]
pub struct WavetableMessage {
    /// Catalog index, or -1 to look the table up by name
    index: i32,
    name: [u8; WAVETABLE_NAME_LEN],
    name_len: usize,
}

impl WavetableMessage {
    pub fn by_index(index: usize) -> Self {
        Self {
            index: i32::try_from(index).unwrap_or(i32::MAX),
            name: [0; WAVETABLE_NAME_LEN],
            name_len: 0,
        }
    }

    /// Names longer than the fixed buffer are truncated on a char boundary
    pub fn by_name(name: &str) -> Self {
        let mut len = name.len().min(WAVETABLE_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut buf = [0; WAVETABLE_NAME_LEN];
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            index: -1,
            name: buf,
            name_len: len,
        }
    }

    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.index).ok()
    }

    pub fn name(&self) -> &str {
        std::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }

    /// Catalog index this message refers to, if it exists
    pub fn resolve(&self, tables: &SharedTables) -> Option<usize> {
        match self.index() {
            Some(i) if i < tables.wavetable_count() => Some(i),
            Some(_) => None,
            None => tables.wavetable_index(self.name()),
        }
    }
}

impl std::fmt::Debug for WavetableMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavetableMessage")
            .field("index", &self.index)
            .field("name", &self.name())
            .finish()
    }
}

/// Producer half, owned by the UI side
pub struct WavetableSender {
    producer: HeapProd<WavetableMessage>,
}

impl WavetableSender {
    /// Queue a request without blocking
    pub fn send(&mut self, message: WavetableMessage) -> Result<()> {
        self.producer
            .try_push(message)
            .map_err(|_| EngineError::QueueFull)
    }

    pub fn request_index(&mut self, index: usize) -> Result<()> {
        self.send(WavetableMessage::by_index(index))
    }

    pub fn request_name(&mut self, name: &str) -> Result<()> {
        self.send(WavetableMessage::by_name(name))
    }
}

/// Consumer half, owned by the module on the audio path
pub struct WavetableReceiver {
    consumer: HeapCons<WavetableMessage>,
}

impl WavetableReceiver {
    /// Empty the queue, keeping only the newest request
    pub fn drain_latest(&mut self) -> Option<WavetableMessage> {
        let mut latest = None;
        while let Some(message) = self.consumer.try_pop() {
            latest = Some(message);
        }
        latest
    }
}

/// Create a queue holding at most `capacity` pending requests
pub fn wavetable_queue(capacity: usize) -> (WavetableSender, WavetableReceiver) {
    let rb = HeapRb::<WavetableMessage>::new(capacity.max(1));
    let (producer, consumer) = rb.split();
    (WavetableSender { producer }, WavetableReceiver { consumer })
}
