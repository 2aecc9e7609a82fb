//! In-process process group: one thread per rank, one inbox per thread.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{check_rank, Communicator};
use crate::error::TransportError;

/// Receive timeout used when none is configured.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a waiting receive checks whether its peer has left the group.
const DEPARTURE_POLL: Duration = Duration::from_millis(10);

/// Epoch used for everything outside a measured run.
const CONTROL_EPOCH: u64 = 0;

#[derive(Debug)]
enum Body {
    Data(Vec<u8>),
    Abort,
}

#[derive(Debug)]
struct Envelope {
    src: usize,
    context: u64,
    epoch: u64,
    tag: u32,
    body: Body,
}

/// Messages that arrived before anyone asked for them.
#[derive(Debug, Default)]
struct Mailbox {
    stash: VecDeque<Envelope>,
    aborted: HashMap<(u64, u64), usize>,
}

impl Mailbox {
    fn deliver(&mut self, env: Envelope) {
        match env.body {
            Body::Abort => {
                self.aborted.entry((env.context, env.epoch)).or_insert(env.src);
            }
            Body::Data(_) => self.stash.push_back(env),
        }
    }

    fn position(&self, src: usize, context: u64, epoch: u64, tag: u32) -> Option<usize> {
        self.stash
            .iter()
            .position(|e| e.src == src && e.context == context && e.epoch == epoch && e.tag == tag)
    }

    fn take(&mut self, src: usize, context: u64, epoch: u64, tag: u32) -> Option<Vec<u8>> {
        let pos = self.position(src, context, epoch, tag)?;
        match self.stash.remove(pos)?.body {
            Body::Data(payload) => Some(payload),
            Body::Abort => None,
        }
    }

    fn aborted_by(&self, context: u64, epoch: u64) -> Option<usize> {
        if epoch == CONTROL_EPOCH {
            return None;
        }
        self.aborted.get(&(context, epoch)).copied()
    }

    /// Drop messages and abort markers of `context` from epochs before `epoch`.
    ///
    /// Epoch ids only grow, so nothing can ask for them again.
    fn retire(&mut self, context: u64, epoch: u64) {
        let stale = |c: u64, e: u64| c == context && e != CONTROL_EPOCH && e < epoch;
        self.stash.retain(|env| !stale(env.context, env.epoch));
        self.aborted.retain(|&(c, e), _| !stale(c, e));
    }

    fn len(&self) -> usize {
        self.stash.len() + self.aborted.len()
    }
}

#[derive(Debug)]
struct Endpoint {
    rank: usize,
    outboxes: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    mailbox: Mutex<Mailbox>,
    timeout: Duration,
    departed: Arc<[AtomicBool]>,
}

impl Endpoint {
    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        // A poisoned mailbox only means another borrow panicked mid-test;
        // the queue itself is still consistent.
        self.mailbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move everything already queued on the inbox into `mailbox`.
    fn pull(&self, mailbox: &mut Mailbox) {
        while let Ok(env) = self.inbox.try_recv() {
            mailbox.deliver(env);
        }
    }

    fn has_departed(&self, rank: usize) -> bool {
        self.departed[rank].load(Ordering::SeqCst)
    }
}

/// Communicator for one rank of a [`ThreadGroup`].
#[derive(Debug)]
pub struct LocalComm {
    endpoint: Arc<Endpoint>,
    context: u64,
    size: usize,
    epoch: Cell<u64>,
    next_epoch: Cell<u64>,
    splits: Cell<u64>,
}

impl LocalComm {
    fn with_context(endpoint: Arc<Endpoint>, context: u64, size: usize) -> Self {
        Self {
            endpoint,
            context,
            size,
            epoch: Cell::new(CONTROL_EPOCH),
            next_epoch: Cell::new(CONTROL_EPOCH + 1),
            splits: Cell::new(0),
        }
    }

    /// Current epoch id (0 outside measured runs).
    pub fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Messages and abort markers held for receives nobody has posted yet.
    pub fn pending(&self) -> usize {
        let mut mailbox = self.endpoint.mailbox();
        self.endpoint.pull(&mut mailbox);
        mailbox.len()
    }

    fn retire(&self, epoch: u64) {
        let mut mailbox = self.endpoint.mailbox();
        self.endpoint.pull(&mut mailbox);
        mailbox.retire(self.context, epoch);
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        if self.context == 0 {
            self.endpoint.departed[self.endpoint.rank].store(true, Ordering::SeqCst);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.endpoint.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: u32, data: &[u8]) -> Result<(), TransportError> {
        check_rank(dest, self.size)?;
        let env = Envelope {
            src: self.rank(),
            context: self.context,
            epoch: self.epoch.get(),
            tag,
            body: Body::Data(data.to_vec()),
        };
        self.endpoint.outboxes[dest]
            .send(env)
            .map_err(|_| TransportError::Disconnected { peer: dest })
    }

    /// Receive inside a run waits at most the group's timeout. Outside
    /// runs it waits until the message arrives or `src` leaves the group,
    /// so ranks idling between tests stay parked however long the tests
    /// of other ranks take.
    fn recv(&self, src: usize, tag: u32) -> Result<Vec<u8>, TransportError> {
        check_rank(src, self.size)?;
        let epoch = self.epoch.get();
        let deadline = (epoch != CONTROL_EPOCH).then(|| Instant::now() + self.endpoint.timeout);
        let mut mailbox = self.endpoint.mailbox();
        let mut departed = false;
        loop {
            if let Some(payload) = mailbox.take(src, self.context, epoch, tag) {
                return Ok(payload);
            }
            if let Some(peer) = mailbox.aborted_by(self.context, epoch) {
                return Err(TransportError::Aborted { peer });
            }
            if departed {
                return Err(TransportError::Disconnected { peer: src });
            }
            let now = Instant::now();
            let wake = match deadline {
                Some(deadline) if deadline <= now => {
                    return Err(TransportError::Timeout { peer: src })
                }
                Some(deadline) => deadline.min(now + DEPARTURE_POLL),
                None => now + DEPARTURE_POLL,
            };
            match self.endpoint.inbox.recv_deadline(wake) {
                Ok(env) => mailbox.deliver(env),
                Err(RecvTimeoutError::Timeout) => {
                    // Everything a departed peer sent is already queued
                    if self.endpoint.has_departed(src) {
                        self.endpoint.pull(&mut mailbox);
                        departed = true;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected { peer: src })
                }
            }
        }
    }

    fn probe(&self, src: usize, tag: u32) -> Result<bool, TransportError> {
        check_rank(src, self.size)?;
        let epoch = self.epoch.get();
        let mut mailbox = self.endpoint.mailbox();
        self.endpoint.pull(&mut mailbox);
        if mailbox.position(src, self.context, epoch, tag).is_some() {
            return Ok(true);
        }
        match mailbox.aborted_by(self.context, epoch) {
            Some(peer) => Err(TransportError::Aborted { peer }),
            None if self.endpoint.has_departed(src) => {
                // Re-check: the peer may have sent right before leaving
                self.endpoint.pull(&mut mailbox);
                match mailbox.position(src, self.context, epoch, tag) {
                    Some(_) => Ok(true),
                    None => Err(TransportError::Disconnected { peer: src }),
                }
            }
            None => Ok(false),
        }
    }

    fn split(&self, size: usize) -> Result<Option<Box<dyn Communicator>>, TransportError> {
        if size == 0 || size > self.size {
            return Err(TransportError::InvalidRank {
                rank: size,
                size: self.size,
            });
        }
        let n = self.splits.get() + 1;
        self.splits.set(n);
        let context = self.context.wrapping_mul(1_000_003).wrapping_add(n);
        if self.rank() >= size {
            return Ok(None);
        }
        Ok(Some(Box::new(LocalComm::with_context(
            Arc::clone(&self.endpoint),
            context,
            size,
        ))))
    }

    fn begin_epoch(&self) -> u64 {
        let epoch = self.next_epoch.get();
        self.next_epoch.set(epoch + 1);
        self.epoch.set(epoch);
        self.retire(epoch);
        epoch
    }

    fn end_epoch(&self) {
        let ended = self.epoch.replace(CONTROL_EPOCH);
        if ended != CONTROL_EPOCH {
            self.retire(ended + 1);
        }
    }

    fn abort_epoch(&self) -> Result<(), TransportError> {
        let epoch = self.epoch.get();
        if epoch == CONTROL_EPOCH {
            return Ok(());
        }
        for dest in (0..self.size).filter(|&r| r != self.rank()) {
            let env = Envelope {
                src: self.rank(),
                context: self.context,
                epoch,
                tag: 0,
                body: Body::Abort,
            };
            self.endpoint.outboxes[dest]
                .send(env)
                .map_err(|_| TransportError::Disconnected { peer: dest })?;
        }
        Ok(())
    }
}

/// A group of `size` ranks, each running on its own thread.
///
/// ```
/// use collbench::transport::{Communicator, ThreadGroup};
///
/// let ranks = ThreadGroup::new(3)
///     .run(|comm| {
///         comm.barrier().unwrap();
///         comm.rank()
///     })
///     .unwrap();
/// assert_eq!(ranks, vec![0, 1, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    size: usize,
    timeout: Duration,
}

impl ThreadGroup {
    /// A group of `size` ranks.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a process group needs at least one rank");
        Self {
            size,
            timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Set the receive timeout applied inside measured runs.
    ///
    /// Receives outside runs wait until the sender delivers or leaves the
    /// group.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Build the connected endpoints without spawning anything.
    pub fn communicators(&self) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.size).map(|_| unbounded()).unzip();
        let departed: Arc<[AtomicBool]> = (0..self.size).map(|_| AtomicBool::new(false)).collect();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                let endpoint = Endpoint {
                    rank,
                    outboxes: senders.clone(),
                    inbox,
                    mailbox: Mutex::new(Mailbox::default()),
                    timeout: self.timeout,
                    departed: Arc::clone(&departed),
                };
                LocalComm::with_context(Arc::new(endpoint), 0, self.size)
            })
            .collect()
    }

    /// Run `f` once per rank, each on a named thread, and collect the results in rank order.
    ///
    /// A panic on any rank is resumed on the caller after all threads finish.
    pub fn run<F, R>(&self, f: F) -> io::Result<Vec<R>>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|s| {
            let handles = self
                .communicators()
                .into_iter()
                .map(|comm| {
                    thread::Builder::new()
                        .name(format!("rank-{}", comm.rank()))
                        .spawn_scoped(s, move || f(comm))
                })
                .collect::<io::Result<Vec<_>>>()?;
            Ok(handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect())
        })
    }
}
