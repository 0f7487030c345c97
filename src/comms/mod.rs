//! Serial communication channel.
//!
//! - [`ring`]: receive/transmit byte rings and the transmit-ready signal
//! - [`line`]: command line assembly
//! - [`framing`]: outbound record formatting
//!
//! [`channel`] builds both sides of the link: the [`CommsChannel`] used by the main loop
//! and the [`LinkEnds`] driven by the serial pumps (the interrupt side).

pub mod framing;
pub mod line;
pub mod ring;

pub use framing::{Fields, Record, RecordClass};
pub use line::LineAssembler;
pub use ring::{byte_ring, ByteConsumer, ByteProducer, TxReady, RX_CAPACITY, TX_CAPACITY};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Sleep between free-space checks while a record waits for the transmit ring.
const SEND_POLL: Duration = Duration::from_micros(200);

/// Build a channel with the given ring capacities.
pub fn channel(rx_capacity: usize, tx_capacity: usize) -> (CommsChannel, LinkEnds) {
    let (rx_prod, rx_cons) = byte_ring(rx_capacity);
    let (tx_prod, tx_cons) = byte_ring(tx_capacity);
    let tx_ready = TxReady::new();
    (
        CommsChannel {
            rx: rx_cons,
            tx: tx_prod,
            tx_ready: tx_ready.clone(),
            tx_capacity: tx_capacity.max(1),
            send_timeout: Duration::ZERO,
            assembler: LineAssembler::new(),
            reported_rx_drops: 0,
        },
        LinkEnds {
            rx: rx_prod,
            tx: tx_cons,
            tx_ready,
        },
    )
}

/// Main-loop side: reads command lines, sends records.
pub struct CommsChannel {
    rx: ByteConsumer,
    tx: ByteProducer,
    tx_ready: Arc<TxReady>,
    tx_capacity: usize,
    send_timeout: Duration,
    assembler: LineAssembler,
    reported_rx_drops: u64,
}

impl CommsChannel {
    /// How long [`send`](Self::send) may block waiting for the transmit pump to make
    /// room. Zero (the default) drops a record that does not fit at once.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Return the next complete command line, if one has been received.
    ///
    /// Never blocks; a partial line stays buffered for the next call.
    pub fn poll_line(&mut self) -> Option<String> {
        let dropped = self.rx.dropped();
        if dropped != self.reported_rx_drops {
            warn!(
                lost = dropped - self.reported_rx_drops,
                "receive ring overflow, bytes dropped"
            );
            self.reported_rx_drops = dropped;
        }
        while let Some(byte) = self.rx.pop() {
            if let Some(line) = self.assembler.push(byte) {
                trace!(%line, "command line received");
                return Some(line);
            }
        }
        None
    }

    /// Queue a record for transmission and raise the transmit-ready interrupt.
    ///
    /// A record is queued whole or not at all. When the ring lacks room the call waits
    /// up to the send timeout for the pump to drain it, then drops the record and counts
    /// its bytes as lost. Returns whether the record was queued.
    pub fn send(&mut self, record: &Record) -> bool {
        let wire = record.to_wire();
        if !self.wait_for_room(wire.len()) {
            self.tx.count_dropped(wire.len());
            warn!(
                tag = %record.tag,
                class = ?record.class(),
                lost = wire.len(),
                "transmit ring full, record dropped"
            );
            return false;
        }
        self.tx.push_all(wire.as_bytes());
        self.tx_ready.request();
        trace!(tag = %record.tag, class = ?record.class(), "record queued");
        true
    }

    fn wait_for_room(&mut self, len: usize) -> bool {
        if self.tx.free_len() >= len {
            return true;
        }
        if len > self.tx_capacity || self.send_timeout.is_zero() {
            return false;
        }
        self.tx_ready.request();
        let deadline = Instant::now() + self.send_timeout;
        while self.tx.free_len() < len {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(SEND_POLL);
        }
        true
    }

    /// Bytes lost to receive overflow.
    pub fn rx_dropped(&self) -> u64 {
        self.rx.dropped()
    }

    /// Bytes lost to transmit overflow.
    pub fn tx_dropped(&self) -> u64 {
        self.tx.dropped()
    }
}

/// Interrupt side: fed by the receive pump, drained by the transmit pump.
pub struct LinkEnds {
    /// Receive ring input.
    pub rx: ByteProducer,
    /// Transmit ring output.
    pub tx: ByteConsumer,
    /// Transmit-ready interrupt shared with the channel.
    pub tx_ready: Arc<TxReady>,
}

impl LinkEnds {
    /// Deliver received bytes, dropping whatever does not fit.
    pub fn receive(&mut self, bytes: &[u8]) -> usize {
        self.rx.push_all(bytes)
    }

    /// Take all pending output. Disables the transmit interrupt once the ring is empty.
    pub fn take_output(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tx.len());
        self.tx.drain_into(&mut out);
        if self.tx.is_empty() {
            self.tx_ready.disable();
        }
        out
    }
}
