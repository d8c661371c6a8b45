use parking_lot::Mutex;

use crate::cluster::{Cluster, Mailbox};
use crate::ProcId;

/// Records buffered per destination before a batch is shipped.
const BUFFER_CAPACITY: usize = 4096;

/// A typed, P-way routing buffer.
///
/// Sends append to a per-lane, per-destination staging buffer; a buffer that
/// reaches the capacity threshold is handed to the mailbox as one batch.
/// Lanes exist so concurrent senders (one lane per worker thread) do not
/// contend on a single buffer.
///
/// Delivery is complete only after every process called [`flush`] and passed
/// a cluster barrier; until then [`recv`] may observe a prefix. Batches are
/// received in arbitrary order, both across and within sender pids.
///
/// [`flush`]: BufferedExchange::flush
/// [`recv`]: BufferedExchange::recv
pub struct BufferedExchange<T> {
    mailbox: Mailbox<T>,
    lanes: Vec<Mutex<Vec<Vec<T>>>>,
    num_procs: usize,
}

impl<T: Send + 'static> BufferedExchange<T> {
    pub fn new<C: Cluster>(cluster: &C, name: &str) -> Self {
        Self::with_lanes(cluster, name, num_cpus::get().max(1))
    }

    pub fn with_lanes<C: Cluster>(cluster: &C, name: &str, num_lanes: usize) -> Self {
        let num_procs = cluster.num_procs();
        let lanes = (0..num_lanes.max(1))
            .map(|_| Mutex::new((0..num_procs).map(|_| Vec::new()).collect()))
            .collect();

        Self {
            mailbox: cluster.mailbox(name),
            lanes,
            num_procs,
        }
    }

    /// Queues one record for `dst`. `lane` is an arbitrary sender id (e.g. the
    /// worker-thread index) and is reduced modulo the lane count.
    pub fn send(&self, dst: ProcId, record: T, lane: usize) {
        assert!((dst as usize) < self.num_procs, "send to unknown pid {dst}");

        let mut buffers = self.lanes[lane % self.lanes.len()].lock();
        let buffer = &mut buffers[dst as usize];
        buffer.push(record);
        if buffer.len() >= BUFFER_CAPACITY {
            let batch = std::mem::take(buffer);
            self.mailbox.post(dst, batch);
        }
    }

    /// Ships every non-empty staging buffer. Pair with a cluster barrier to
    /// make delivery complete.
    pub fn flush(&self) {
        for lane in &self.lanes {
            let mut buffers = lane.lock();
            for (dst, buffer) in buffers.iter_mut().enumerate() {
                if !buffer.is_empty() {
                    self.mailbox.post(dst as ProcId, std::mem::take(buffer));
                }
            }
        }
    }

    /// Next `(sender, batch)` delivered to this process, if any.
    pub fn recv(&self) -> Option<(ProcId, Vec<T>)> {
        self.mailbox.take()
    }

    /// Number of records delivered to this process and not yet received.
    pub fn len(&self) -> usize {
        self.mailbox.pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops delivered batches and unsent staging buffers.
    pub fn clear(&self) {
        while self.mailbox.take().is_some() {}
        for lane in &self.lanes {
            for buffer in lane.lock().iter_mut() {
                buffer.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;

    #[test]
    fn flush_makes_small_sends_visible() {
        LocalCluster::spawn(2, |cluster| {
            let exchange = BufferedExchange::with_lanes(&cluster, "test.flush", 2);
            let peer = 1 - cluster.pid();

            exchange.send(peer, cluster.pid() as u32, 0);
            exchange.send(peer, 100 + cluster.pid() as u32, 1);
            assert_eq!(exchange.len(), 0);

            exchange.flush();
            cluster.barrier();

            assert_eq!(exchange.len(), 2);
            let mut records = Vec::new();
            while let Some((sender, batch)) = exchange.recv() {
                assert_eq!(sender, peer);
                records.extend(batch);
            }
            records.sort_unstable();
            assert_eq!(records, vec![peer as u32, 100 + peer as u32]);
        });
    }

    #[test]
    fn full_buffers_ship_without_flush() {
        LocalCluster::spawn(1, |cluster| {
            let exchange = BufferedExchange::with_lanes(&cluster, "test.threshold", 1);

            for i in 0..BUFFER_CAPACITY {
                exchange.send(0, i, 0);
            }
            // The capacity-th record triggered the post to our own inbox.
            assert_eq!(exchange.len(), BUFFER_CAPACITY);

            exchange.send(0, BUFFER_CAPACITY, 0);
            assert_eq!(exchange.len(), BUFFER_CAPACITY);
        });
    }

    #[test]
    fn clear_drops_pending_and_staged() {
        LocalCluster::spawn(1, |cluster| {
            let exchange = BufferedExchange::with_lanes(&cluster, "test.clear", 1);

            exchange.send(0, 1_u8, 0);
            exchange.flush();
            exchange.send(0, 2_u8, 0);

            exchange.clear();
            assert!(exchange.is_empty());

            exchange.flush();
            assert!(exchange.recv().is_none());
        });
    }
}
