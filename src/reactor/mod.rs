//! # Reactor Module
//!
//! Single-threaded readiness multiplexer built on `epoll`.
//!
//! The reactor owns the wait primitive and a registry of sources. Each source
//! carries a caller-chosen tag `T`; when a source becomes ready the reactor
//! hands the tag, the descriptor and the readiness mask to the dispatch
//! closure given to [`Reactor::run`]. The reactor knows nothing about what
//! the sources are.
//!
//! ## Descriptor ownership
//!
//! | Source kind | Created by | Closed by |
//! |-------------|------------|-----------|
//! | generic ([`Reactor::register`]) | caller | caller, after [`Reactor::unregister`] |
//! | timer ([`Reactor::create_timer`]) | reactor | reactor, in [`Reactor::remove_timer`] |
//!
//! The two kinds get distinct handle types ([`SourceKey`], [`TimerKey`]) so a
//! timer can never be unregistered as a generic source and leak its descriptor.
//!
//! ## Dispatch
//!
//! Each wake dispatches at most [`MAX_EVENTS_PER_WAKE`] ready sources, one at
//! a time and to completion. The stop flag is only checked between batches,
//! so a batch in flight always finishes.

pub mod timer;

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, error, trace};

use crate::error::{DemaRcError, Result};
use timer::PeriodicTimer;

pub use timer::read_expirations;

/// Maximum number of ready sources dispatched per wake.
pub const MAX_EVENTS_PER_WAKE: usize = 16;

/// Readiness mask, used both as registration interest and as the reported
/// readiness of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(EpollFlags);

impl Readiness {
    /// Data available to read.
    pub const READABLE: Readiness = Readiness(EpollFlags::EPOLLIN);
    /// Error condition on the descriptor.
    pub const ERROR: Readiness = Readiness(EpollFlags::EPOLLERR);
    /// Peer hung up.
    pub const HANGUP: Readiness = Readiness(EpollFlags::EPOLLHUP);

    /// Empty mask.
    #[must_use]
    pub fn empty() -> Self {
        Readiness(EpollFlags::empty())
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Readiness) -> bool {
        self.0.contains(other.0)
    }

    /// Returns `true` if the mask includes "readable".
    #[must_use]
    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    /// Returns `true` if the descriptor reported a hang-up or an error.
    #[must_use]
    pub fn is_hangup(self) -> bool {
        self.contains(Self::HANGUP) || self.contains(Self::ERROR)
    }

    fn flags(self) -> EpollFlags {
        self.0
    }
}

impl std::ops::BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness(self.0 | rhs.0)
    }
}

/// Handle to a generic source registered with [`Reactor::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey(u64);

/// Handle to a timer source created with [`Reactor::create_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

/// A ready source, as handed to the dispatch closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready<T> {
    /// Tag given at registration.
    pub tag: T,
    /// Descriptor that became ready.
    pub fd: RawFd,
    /// What it is ready for.
    pub readiness: Readiness,
}

/// Descriptor held by a registry entry.
enum Descriptor {
    /// Owned by the caller; only its number is remembered.
    Borrowed(RawFd),
    /// Owned by the reactor; closed when the entry is dropped.
    Timer(PeriodicTimer),
}

impl Descriptor {
    fn raw_fd(&self) -> RawFd {
        match self {
            Descriptor::Borrowed(fd) => *fd,
            Descriptor::Timer(timer) => timer.as_fd().as_raw_fd(),
        }
    }
}

struct Source<T> {
    tag: T,
    descriptor: Descriptor,
}

/// Readiness-driven event loop.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use dema_rc::reactor::Reactor;
///
/// let mut reactor = Reactor::new()?;
/// let mut ticks = 0;
/// reactor.create_timer(Duration::from_millis(10), "tick")?;
/// reactor.run(|reactor, ready| {
///     ticks += 1;
///     if ticks == 3 {
///         reactor.stop();
///     }
///     let _ = ready;
/// })?;
/// # Ok::<(), dema_rc::error::DemaRcError>(())
/// ```
pub struct Reactor<T> {
    epoll: Epoll,
    sources: HashMap<u64, Source<T>>,
    next_key: u64,
    should_exit: bool,
}

impl<T> std::fmt::Debug for Reactor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("sources", &self.sources.len())
            .field("should_exit", &self.should_exit)
            .finish_non_exhaustive()
    }
}

impl<T: Copy> Reactor<T> {
    /// Creates the epoll instance and an empty registry.
    ///
    /// # Errors
    ///
    /// Returns `Sys` if `epoll_create1` fails.
    pub fn new() -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|e| {
            error!("Could not create epoll instance: {}", e);
            e
        })?;

        Ok(Self {
            epoll,
            sources: HashMap::new(),
            next_key: 0,
            should_exit: false,
        })
    }

    /// Number of registered sources, timers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.should_exit
    }

    /// Registers a caller-owned descriptor.
    ///
    /// The descriptor must stay open until it is passed to
    /// [`unregister`](Self::unregister); closing it remains the caller's job.
    ///
    /// # Errors
    ///
    /// Returns `Sys` if `epoll_ctl(EPOLL_CTL_ADD)` rejects the descriptor.
    /// Nothing is recorded in the registry in that case.
    pub fn register<F: AsFd>(&mut self, fd: F, tag: T, interest: Readiness) -> Result<SourceKey> {
        let raw = fd.as_fd().as_raw_fd();
        let key = self.add_to_epoll(fd.as_fd(), interest)?;
        self.sources.insert(
            key,
            Source {
                tag,
                descriptor: Descriptor::Borrowed(raw),
            },
        );

        debug!("source {} added", raw);
        Ok(SourceKey(key))
    }

    /// Removes a generic source from the multiplexer and the registry.
    ///
    /// `fd` is the descriptor given to [`register`](Self::register); it is
    /// left open.
    ///
    /// # Errors
    ///
    /// - `SourceNotFound`: no generic source for `fd` is registered under `key`
    /// - `Sys`: `epoll_ctl(EPOLL_CTL_DEL)` failed; the entry is kept
    pub fn unregister<F: AsFd>(&mut self, key: SourceKey, fd: F) -> Result<()> {
        let fd = fd.as_fd();
        let raw = fd.as_raw_fd();

        let registered = matches!(
            self.sources.get(&key.0),
            Some(Source {
                descriptor: Descriptor::Borrowed(registered),
                ..
            }) if *registered == raw
        );
        if !registered {
            error!("source not found: key={} fd={}", key.0, raw);
            return Err(DemaRcError::SourceNotFound(key.0));
        }

        self.epoll.delete(fd).map_err(|e| {
            error!("Could not remove fd {}: {}", raw, e);
            e
        })?;

        self.sources.remove(&key.0);
        debug!("source {} removed", raw);

        Ok(())
    }

    /// Creates a periodic timer source.
    ///
    /// The timer first fires one `interval` from now and then every
    /// `interval`. The reactor owns the timer descriptor; it is closed by
    /// [`remove_timer`](Self::remove_timer) or when the reactor is dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` or `Sys`. A timer created before the
    /// failing step is closed before returning.
    pub fn create_timer(&mut self, interval: Duration, tag: T) -> Result<TimerKey> {
        let timer = PeriodicTimer::new(interval).map_err(|e| {
            error!("unable to create timer: {}", e);
            e
        })?;

        let raw = timer.as_fd().as_raw_fd();
        // On failure `timer` is dropped here, closing the descriptor.
        let key = self.add_to_epoll(timer.as_fd(), Readiness::READABLE)?;
        self.sources.insert(
            key,
            Source {
                tag,
                descriptor: Descriptor::Timer(timer),
            },
        );

        debug!("timeout added: fd={} interval={:?}", raw, interval);
        Ok(TimerKey(key))
    }

    /// Removes a timer source and closes its descriptor.
    ///
    /// # Errors
    ///
    /// - `SourceNotFound`: no timer is registered under `key`
    /// - `Sys`: `epoll_ctl(EPOLL_CTL_DEL)` failed; the timer is closed anyway
    pub fn remove_timer(&mut self, key: TimerKey) -> Result<()> {
        let is_timer = matches!(
            self.sources.get(&key.0),
            Some(Source {
                descriptor: Descriptor::Timer(_),
                ..
            })
        );
        if !is_timer {
            error!("timer not found: {}", key.0);
            return Err(DemaRcError::SourceNotFound(key.0));
        }

        let Some(source) = self.sources.remove(&key.0) else {
            return Err(DemaRcError::SourceNotFound(key.0));
        };

        let raw = source.descriptor.raw_fd();
        let result = match &source.descriptor {
            Descriptor::Timer(timer) => self.epoll.delete(timer),
            Descriptor::Borrowed(_) => Ok(()),
        };
        // Dropping the entry closes the timer descriptor.
        drop(source);

        result.map_err(|e| {
            error!("Could not remove timer fd {}: {}", raw, e);
            e
        })?;

        debug!("timeout removed: fd={}", raw);
        Ok(())
    }

    /// Requests loop termination.
    ///
    /// Idempotent. Observed by [`run`](Self::run) after the current batch.
    pub fn stop(&mut self) {
        self.should_exit = true;
    }

    /// Runs the loop until [`stop`](Self::stop) is called.
    ///
    /// Blocks in `epoll_wait`; every ready source of a wake is passed to
    /// `dispatch` in the order the kernel reported it. `EINTR` is retried
    /// without involving `dispatch`.
    ///
    /// # Errors
    ///
    /// Returns `Sys` if `epoll_wait` fails with anything but `EINTR`.
    pub fn run<F>(&mut self, mut dispatch: F) -> Result<()>
    where
        F: FnMut(&mut Self, Ready<T>),
    {
        let mut events = [EpollEvent::empty(); MAX_EVENTS_PER_WAKE];

        while !self.should_exit {
            let count = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(count) => count,
                Err(Errno::EINTR) => {
                    debug!("Interrupted epoll, retrying");
                    continue;
                }
                Err(e) => {
                    error!("epoll_wait failed: {}", e);
                    return Err(e.into());
                }
            };

            for event in &events[..count] {
                // A callback earlier in this batch may have removed the source.
                let Some(source) = self.sources.get(&event.data()) else {
                    trace!("skipping removed source {}", event.data());
                    continue;
                };

                let ready = Ready {
                    tag: source.tag,
                    fd: source.descriptor.raw_fd(),
                    readiness: Readiness(event.events()),
                };
                dispatch(self, ready);
            }
        }

        Ok(())
    }

    /// Adds `fd` to epoll under a fresh key.
    ///
    /// Callers record the registry entry only after this succeeds, so a
    /// failed registration never leaves a half-registered source behind.
    /// Keys are never reused.
    fn add_to_epoll(&mut self, fd: BorrowedFd<'_>, interest: Readiness) -> Result<u64> {
        let key = self.next_key;

        self.epoll
            .add(fd, EpollEvent::new(interest.flags(), key))
            .map_err(|e| {
                error!("Could not add fd {}: {}", fd.as_raw_fd(), e);
                e
            })?;

        self.next_key += 1;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg};
    use nix::sys::pthread::{pthread_kill, pthread_self};
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Tag {
        Pipe,
        Other,
        Tick,
        Guard,
    }

    /// Stops the loop if a test never reaches its own stop condition.
    fn add_guard(reactor: &mut Reactor<Tag>) -> TimerKey {
        reactor.create_timer(Duration::from_secs(2), Tag::Guard).unwrap()
    }

    #[test]
    fn test_new_reactor_is_empty() {
        let reactor: Reactor<Tag> = Reactor::new().unwrap();
        assert!(reactor.is_empty());
        assert!(!reactor.is_stopped());
    }

    #[test]
    fn test_readiness_bits() {
        let mask = Readiness::READABLE | Readiness::HANGUP;
        assert!(mask.is_readable());
        assert!(mask.is_hangup());
        assert!(!mask.contains(Readiness::ERROR));
        assert!(Readiness::ERROR.is_hangup());
        assert!(!Readiness::READABLE.is_hangup());
        assert!(!Readiness::empty().is_readable());
    }

    #[test]
    fn test_register_and_unregister() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();

        let key = reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        assert_eq!(reactor.len(), 1);

        reactor.unregister(key, &a).unwrap();
        assert!(reactor.is_empty());

        // Caller still owns the descriptor
        assert!(a.peer_addr().is_ok());
        assert!(fcntl(a.as_raw_fd(), FcntlArg::F_GETFD).is_ok());
    }

    #[test]
    fn test_unregister_unknown_source() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();

        let key = reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        reactor.unregister(key, &a).unwrap();

        match reactor.unregister(key, &a) {
            Err(DemaRcError::SourceNotFound(_)) => {}
            other => panic!("Expected SourceNotFound, got: {:?}", other),
        }
    }

    #[test]
    fn test_unregister_with_other_descriptor() {
        let mut reactor = Reactor::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();

        let key = reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();

        assert!(matches!(
            reactor.unregister(key, &b),
            Err(DemaRcError::SourceNotFound(_))
        ));
        assert_eq!(reactor.len(), 1);

        reactor.unregister(key, &a).unwrap();
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_timer_key_is_not_a_source_key() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();

        let timer = reactor.create_timer(Duration::from_secs(1), Tag::Tick).unwrap();
        let timer_fd = reactor.sources[&timer.0].descriptor.raw_fd();

        // Same key number and descriptor, wrong kind
        assert!(matches!(
            reactor.unregister(SourceKey(timer.0), &a),
            Err(DemaRcError::SourceNotFound(_))
        ));
        assert!(fcntl(timer_fd, FcntlArg::F_GETFD).is_ok());
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn test_failed_registration_leaves_no_entry() {
        let mut reactor = Reactor::new().unwrap();

        // Regular files cannot be added to epoll (EPERM)
        let file = tempfile::tempfile().unwrap();
        let result = reactor.register(&file, Tag::Pipe, Readiness::READABLE);

        assert!(matches!(result, Err(DemaRcError::Sys(Errno::EPERM))));
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rolls_back() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();

        reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        let result = reactor.register(&a, Tag::Other, Readiness::READABLE);

        assert!(matches!(result, Err(DemaRcError::Sys(Errno::EEXIST))));
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn test_create_and_remove_timer() {
        let mut reactor = Reactor::new().unwrap();

        let key = reactor.create_timer(Duration::from_millis(10), Tag::Tick).unwrap();
        assert_eq!(reactor.len(), 1);
        let raw = reactor.sources[&key.0].descriptor.raw_fd();
        assert!(fcntl(raw, FcntlArg::F_GETFD).is_ok());

        reactor.remove_timer(key).unwrap();
        assert!(reactor.is_empty());

        // The reactor closed the timer descriptor
        assert_eq!(fcntl(raw, FcntlArg::F_GETFD), Err(Errno::EBADF));

        assert!(matches!(
            reactor.remove_timer(key),
            Err(DemaRcError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_create_timer_zero_interval_leaves_no_entry() {
        let mut reactor = Reactor::new().unwrap();
        let result = reactor.create_timer(Duration::ZERO, Tag::Tick);

        assert!(matches!(result, Err(DemaRcError::InvalidInterval(_))));
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut reactor: Reactor<Tag> = Reactor::new().unwrap();
        reactor.stop();
        reactor.stop();
        assert!(reactor.is_stopped());

        // Already stopped: run returns without waiting
        let mut calls = 0;
        reactor.run(|_, _| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_dispatches_readable_source() {
        let mut reactor = Reactor::new().unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        add_guard(&mut reactor);

        reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        b.write_all(b"x").unwrap();

        let mut seen = Vec::new();
        reactor
            .run(|reactor, ready| {
                seen.push(ready);
                reactor.stop();
            })
            .unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tag, Tag::Pipe);
        assert_eq!(seen[0].fd, a.as_raw_fd());
        assert!(seen[0].readiness.is_readable());
    }

    #[test]
    fn test_batch_completes_after_stop() {
        let mut reactor = Reactor::new().unwrap();
        let (a, mut a_peer) = UnixStream::pair().unwrap();
        let (b, mut b_peer) = UnixStream::pair().unwrap();
        add_guard(&mut reactor);

        reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        reactor.register(&b, Tag::Other, Readiness::READABLE).unwrap();
        a_peer.write_all(b"x").unwrap();
        b_peer.write_all(b"y").unwrap();

        let mut tags = Vec::new();
        reactor
            .run(|reactor, ready| {
                // Stop requested by the first callback of the batch
                reactor.stop();
                tags.push(ready.tag);
            })
            .unwrap();

        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&Tag::Pipe));
        assert!(tags.contains(&Tag::Other));
    }

    #[test]
    fn test_timer_fires_repeatedly() {
        let mut reactor = Reactor::new().unwrap();
        add_guard(&mut reactor);
        reactor.create_timer(Duration::from_millis(5), Tag::Tick).unwrap();

        let mut ticks = 0;
        reactor
            .run(|reactor, ready| {
                match ready.tag {
                    Tag::Tick => {
                        if read_expirations(ready.fd).unwrap() > 0 {
                            ticks += 1;
                        }
                        if ticks == 3 {
                            reactor.stop();
                        }
                    }
                    _ => reactor.stop(),
                }
            })
            .unwrap();

        assert_eq!(ticks, 3);
    }

    #[test]
    fn test_source_removed_mid_batch_is_skipped() {
        let mut reactor = Reactor::new().unwrap();
        let (a, mut a_peer) = UnixStream::pair().unwrap();
        let (b, mut b_peer) = UnixStream::pair().unwrap();
        add_guard(&mut reactor);

        let key_a = reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
        let key_b = reactor.register(&b, Tag::Other, Readiness::READABLE).unwrap();
        a_peer.write_all(b"x").unwrap();
        b_peer.write_all(b"y").unwrap();

        let mut calls = 0;
        reactor
            .run(|reactor, ready| {
                calls += 1;
                // Whichever comes first removes the other
                let _ = match ready.tag {
                    Tag::Pipe => reactor.unregister(key_b, &b),
                    _ => reactor.unregister(key_a, &a),
                };
                reactor.stop();
            })
            .unwrap();

        assert_eq!(calls, 1);
    }

    #[test]
    fn test_wake_dispatches_at_most_one_batch() {
        let mut reactor = Reactor::new().unwrap();
        let mut pairs = Vec::new();
        for _ in 0..20 {
            let (a, mut peer) = UnixStream::pair().unwrap();
            reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();
            peer.write_all(b"x").unwrap();
            pairs.push((a, peer));
        }

        let mut calls = 0;
        reactor
            .run(|reactor, _| {
                calls += 1;
                reactor.stop();
            })
            .unwrap();

        assert_eq!(calls, MAX_EVENTS_PER_WAKE);
    }

    static USR1_DELIVERED: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_usr1(_: nix::libc::c_int) {
        USR1_DELIVERED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_interrupted_wait_is_retried() {
        let handler = SigAction::new(SigHandler::Handler(count_usr1), SaFlags::empty(), SigSet::empty());
        // SAFETY: the handler only touches an atomic.
        unsafe { sigaction(Signal::SIGUSR1, &handler) }.unwrap();

        let mut reactor = Reactor::new().unwrap();
        let (a, mut a_peer) = UnixStream::pair().unwrap();
        add_guard(&mut reactor);
        reactor.register(&a, Tag::Pipe, Readiness::READABLE).unwrap();

        // Interrupt the blocked wait, then make the source readable
        let loop_thread = pthread_self();
        let poker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            pthread_kill(loop_thread, Signal::SIGUSR1).unwrap();
            thread::sleep(Duration::from_millis(50));
            a_peer.write_all(b"x").unwrap();
            a_peer
        });

        let mut seen = Vec::new();
        reactor
            .run(|reactor, ready| {
                seen.push(ready.tag);
                reactor.stop();
            })
            .unwrap();
        let _a_peer = poker.join().unwrap();

        assert!(USR1_DELIVERED.load(Ordering::SeqCst) >= 1);
        assert_eq!(seen, vec![Tag::Pipe]);
    }
}
