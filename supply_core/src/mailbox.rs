//! Single-slot latest-value channel from the scheduling loop to the refresh loop.
//!
//! Built on a `crossbeam_channel::bounded(1)`. Publishing never blocks: a
//! stale value still in the slot is evicted first. The receiver keeps the last
//! value it saw so a tick with nothing new still reports the current target.

use crossbeam_channel as xch;

/// What the scheduling loop last committed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub target: f64,
    pub progress: f64,
}

pub fn slot<T: Copy>() -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = xch::bounded(1);
    (
        SlotSender {
            tx,
            evict: rx.clone(),
        },
        SlotReceiver { rx, last: None },
    )
}

#[derive(Debug)]
pub struct SlotSender<T> {
    tx: xch::Sender<T>,
    evict: xch::Receiver<T>,
}

impl<T: Copy> SlotSender<T> {
    /// Replace whatever is in the slot.
    pub fn publish(&self, value: T) {
        let mut value = value;
        // The evicting handle keeps the channel connected, so only Full can occur.
        while let Err(xch::TrySendError::Full(v)) = self.tx.try_send(value) {
            let _ = self.evict.try_recv();
            value = v;
        }
    }
}

#[derive(Debug)]
pub struct SlotReceiver<T> {
    rx: xch::Receiver<T>,
    last: Option<T>,
}

impl<T: Copy> SlotReceiver<T> {
    /// Newest published value, or the previous one if nothing new arrived.
    pub fn latest(&mut self) -> Option<T> {
        if let Some(v) = self.rx.try_iter().last() {
            self.last = Some(v);
        }
        self.last
    }

    /// Forget the cached value.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.last = None;
    }
}
