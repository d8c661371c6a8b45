//! The communication substrate the ingress runs on.
//!
//! The protocol only needs a handful of collectives plus typed point-to-point
//! mailboxes; anything that provides them (an RPC layer, MPI, …) can drive the
//! ingress. [`LocalCluster`] is the in-process implementation: every
//! "process" is a thread, and mailboxes are shared queues.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::{ProcId, MAX_PROCS};

/// One process's view of the cluster.
///
/// All collective operations (`barrier`, `all_reduce_sum`, `all_gather`) must
/// be called by every process in the same order; a transport that detects a
/// peer failure is expected to abort the process rather than return.
pub trait Cluster: Send + Sync + 'static {
    fn pid(&self) -> ProcId;

    fn num_procs(&self) -> usize;

    /// Blocks until every process has reached the same barrier call.
    fn barrier(&self);

    fn all_reduce_sum(&self, value: usize) -> usize;

    /// Collects one value per process, indexed by pid.
    fn all_gather(&self, value: usize) -> Vec<usize>;

    /// A typed point-to-point channel shared by all processes.
    ///
    /// Mailboxes are identified by `(name, T)`; every process asking for the
    /// same pair is attached to the same channel.
    fn mailbox<T: Send + 'static>(&self, name: &str) -> Mailbox<T>;
}

/// Per-destination inbox queues backing a [`Mailbox`].
pub type Inboxes<T> = Vec<Mutex<VecDeque<(ProcId, Vec<T>)>>>;

/// P-way batch channel: post a batch to any destination, take batches
/// addressed to yourself. Batches arrive in arbitrary order across senders.
pub struct Mailbox<T> {
    pid: ProcId,
    inboxes: Arc<Inboxes<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            pid: self.pid,
            inboxes: Arc::clone(&self.inboxes),
        }
    }
}

impl<T: Send> Mailbox<T> {
    /// Allocates the shared state for a `num_procs`-way channel.
    pub fn shared(num_procs: usize) -> Arc<Inboxes<T>> {
        Arc::new((0..num_procs).map(|_| Mutex::new(VecDeque::new())).collect())
    }

    /// Attaches one process to a shared channel.
    pub fn attach(inboxes: Arc<Inboxes<T>>, pid: ProcId) -> Self {
        Self { pid, inboxes }
    }

    pub fn post(&self, dst: ProcId, batch: Vec<T>) {
        self.inboxes[dst as usize].lock().push_back((self.pid, batch));
    }

    pub fn take(&self) -> Option<(ProcId, Vec<T>)> {
        self.inboxes[self.pid as usize].lock().pop_front()
    }

    /// Number of records sitting in this process's inbox.
    pub fn pending(&self) -> usize {
        self.inboxes[self.pid as usize]
            .lock()
            .iter()
            .map(|(_, batch)| batch.len())
            .sum()
    }
}

struct LocalShared {
    num_procs: usize,
    barrier: Barrier,
    gather: Mutex<Vec<usize>>,
    mailboxes: Mutex<FxHashMap<(String, TypeId), Box<dyn Any + Send + Sync>>>,
}

/// An in-process cluster: `P` threads standing in for `P` processes.
pub struct LocalCluster {
    pid: ProcId,
    shared: Arc<LocalShared>,
}

impl LocalCluster {
    /// Runs `run` once per process on its own thread and returns the results
    /// indexed by pid.
    pub fn spawn<F, R>(num_procs: usize, run: F) -> Vec<R>
    where
        F: Fn(LocalCluster) -> R + Send + Sync,
        R: Send,
    {
        assert!(num_procs > 0, "cluster needs at least one process");
        assert!(
            num_procs <= MAX_PROCS,
            "cluster size {num_procs} exceeds the supported maximum of {MAX_PROCS}"
        );

        let shared = Arc::new(LocalShared {
            num_procs,
            barrier: Barrier::new(num_procs),
            gather: Mutex::new(vec![0; num_procs]),
            mailboxes: Mutex::new(FxHashMap::default()),
        });

        std::thread::scope(|scope| {
            let handles = (0..num_procs)
                .map(|pid| {
                    let shared = Arc::clone(&shared);
                    let run = &run;
                    scope.spawn(move || {
                        run(LocalCluster {
                            pid: pid as ProcId,
                            shared,
                        })
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().expect("cluster thread panicked"))
                .collect()
        })
    }
}

impl Cluster for LocalCluster {
    fn pid(&self) -> ProcId {
        self.pid
    }

    fn num_procs(&self) -> usize {
        self.shared.num_procs
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_reduce_sum(&self, value: usize) -> usize {
        self.all_gather(value).into_iter().sum()
    }

    fn all_gather(&self, value: usize) -> Vec<usize> {
        self.shared.gather.lock()[self.pid as usize] = value;
        self.shared.barrier.wait();
        let values = self.shared.gather.lock().clone();
        // Hold everyone until the slots were read so the next collective
        // cannot overwrite them early.
        self.shared.barrier.wait();
        values
    }

    fn mailbox<T: Send + 'static>(&self, name: &str) -> Mailbox<T> {
        let mut mailboxes = self.shared.mailboxes.lock();
        let key = (name.to_string(), TypeId::of::<T>());
        let entry = mailboxes
            .entry(key)
            .or_insert_with(|| Box::new(Mailbox::<T>::shared(self.shared.num_procs)));
        let inboxes = entry
            .downcast_ref::<Arc<Inboxes<T>>>()
            .expect("mailbox name reused with a different record type")
            .clone();
        Mailbox::attach(inboxes, self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gather_is_indexed_by_pid() {
        let gathered = LocalCluster::spawn(4, |cluster| {
            cluster.all_gather(cluster.pid() as usize * 10)
        });

        for result in gathered {
            assert_eq!(result, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn all_reduce_sums_across_procs() {
        let sums = LocalCluster::spawn(3, |cluster| cluster.all_reduce_sum(1 + cluster.pid() as usize));

        assert_eq!(sums, vec![6, 6, 6]);
    }

    #[test]
    fn consecutive_collectives_do_not_interfere() {
        let results = LocalCluster::spawn(2, |cluster| {
            let a = cluster.all_reduce_sum(1);
            let b = cluster.all_reduce_sum(2);
            (a, b)
        });

        assert_eq!(results, vec![(2, 4), (2, 4)]);
    }

    #[test]
    fn mailboxes_deliver_across_procs() {
        let received = LocalCluster::spawn(2, |cluster| {
            let mailbox = cluster.mailbox::<u64>("test.ping");
            let peer = 1 - cluster.pid();

            mailbox.post(peer, vec![cluster.pid() as u64; 3]);
            cluster.barrier();

            let (sender, batch) = mailbox.take().unwrap();
            assert!(mailbox.take().is_none());
            (sender, batch)
        });

        assert_eq!(received[0], (1, vec![1, 1, 1]));
        assert_eq!(received[1], (0, vec![0, 0, 0]));
    }

    #[test]
    fn mailbox_pending_counts_records() {
        LocalCluster::spawn(1, |cluster| {
            let mailbox = cluster.mailbox::<u8>("test.pending");
            assert_eq!(mailbox.pending(), 0);

            mailbox.post(0, vec![1, 2, 3]);
            mailbox.post(0, vec![4]);
            assert_eq!(mailbox.pending(), 4);
        });
    }
}
