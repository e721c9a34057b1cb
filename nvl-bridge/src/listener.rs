//! UDP receive loop
//!
//! Receives datagrams, runs them through the dispatcher and hands the output to
//! the publisher. With more than one worker the datagrams go through a bounded
//! channel to worker threads; a full channel blocks the receive loop. The
//! dispatcher serializes per-key change checks itself.

use crate::config::load_config;
use crate::publisher::Publisher;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use nvl_decoder::{DispatchOutcome, Dispatcher};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Listener settings resolved from CLI and config file
pub struct ListenerOptions {
    pub bind: String,
    pub max_datagram: usize,
    pub queue_depth: usize,
    pub workers: usize,
    /// Check for config changes this often (None = never)
    pub reload_every: Option<Duration>,
    pub config_path: PathBuf,
}

/// Forward dispatcher output to the publisher, logging failures
pub fn publish_outcome(outcome: &DispatchOutcome, publisher: &dyn Publisher) {
    match outcome {
        DispatchOutcome::Emitted(records) => {
            for record in records {
                if let Err(e) = publisher.publish_record(record) {
                    log::error!("{:#}", e);
                }
            }
        }
        DispatchOutcome::UnknownIdentifier(record) => {
            if let Err(e) = publisher.publish_unknown(record) {
                log::error!("{:#}", e);
            }
        }
        // Already logged and counted by the dispatcher
        DispatchOutcome::Dropped(_) => {}
    }
}

/// The received bytes, or `None` if the datagram did not fit.
///
/// `buf` is one byte longer than `max_datagram`, so a longer datagram shows up
/// as `len > max_datagram` instead of being cut silently.
fn accept_datagram(buf: &[u8], len: usize, max_datagram: usize) -> Option<&[u8]> {
    if len > max_datagram {
        None
    } else {
        Some(&buf[..len])
    }
}

/// Worker threads fed through a bounded channel
pub struct WorkerPool {
    sender: Sender<Vec<u8>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        queue_depth: usize,
        dispatcher: Arc<Dispatcher>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<Vec<u8>>(queue_depth);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receiver = receiver.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let publisher = Arc::clone(&publisher);
            let handle = std::thread::Builder::new()
                .name(format!("nvl-worker-{}", i))
                .spawn(move || {
                    for packet in receiver.iter() {
                        let outcome = dispatcher.handle_packet(&packet);
                        publish_outcome(&outcome, publisher.as_ref());
                    }
                })
                .context("Failed to start packet worker")?;
            handles.push(handle);
        }
        Ok(Self { sender, handles })
    }

    /// Queue a packet, blocking while the queue is full
    pub fn submit(&self, packet: Vec<u8>) -> Result<()> {
        self.sender
            .send(packet)
            .map_err(|_| anyhow::anyhow!("All packet workers have stopped"))
    }

    /// Packets waiting for a worker
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Let the workers drain the queue and wait for them
    pub fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("Packet worker panicked");
            }
        }
    }
}

/// Run the receive loop until the socket fails
pub fn run(options: ListenerOptions, dispatcher: Arc<Dispatcher>, publisher: Arc<dyn Publisher>) -> Result<()> {
    let socket = UdpSocket::bind(&options.bind)
        .with_context(|| format!("Failed to bind UDP socket on {}", options.bind))?;
    log::info!("Listening for NVL telegrams on {}", options.bind);

    let pool = if options.workers > 1 {
        let pool = WorkerPool::spawn(
            options.workers,
            options.queue_depth,
            Arc::clone(&dispatcher),
            Arc::clone(&publisher),
        )?;
        log::info!(
            "Handling packets on {} workers (queue depth {})",
            options.workers,
            options.queue_depth
        );
        Some(pool)
    } else {
        None
    };

    let mut reload = match options.reload_every {
        Some(every) => {
            socket
                .set_read_timeout(Some(every))
                .context("Failed to set socket read timeout")?;
            Some(ReloadWatch::new(&options.config_path, every)?)
        }
        None => None,
    };

    let mut oversized: u64 = 0;
    let mut buf = vec![0u8; options.max_datagram + 1];
    let result = loop {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => match accept_datagram(&buf, len, options.max_datagram) {
                Some(packet) => {
                    log::trace!("Received {} bytes from {}", len, addr);
                    match &pool {
                        Some(pool) => {
                            if let Err(e) = pool.submit(packet.to_vec()) {
                                break Err(e);
                            }
                        }
                        None => {
                            let outcome = dispatcher.handle_packet(packet);
                            publish_outcome(&outcome, publisher.as_ref());
                        }
                    }
                }
                None => {
                    oversized += 1;
                    log::warn!(
                        "Dropped datagram from {} longer than max_datagram ({} bytes)",
                        addr,
                        options.max_datagram
                    );
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(anyhow::Error::new(e).context("UDP receive failed")),
        }

        if let Some(watch) = reload.as_mut() {
            watch.poll(&dispatcher, oversized, pool.as_ref().map_or(0, WorkerPool::queued));
        }
    };

    if let Some(pool) = pool {
        pool.shutdown();
    }
    result
}

/// Reloads the registry when the config file changes
struct ReloadWatch {
    path: PathBuf,
    every: Duration,
    last_check: Instant,
    changed: Arc<AtomicBool>,
    _watcher: RecommendedWatcher,
}

impl ReloadWatch {
    fn new(path: &Path, every: Duration) -> Result<Self> {
        let changed = Arc::new(AtomicBool::new(false));
        let watcher = watch_file(path, Arc::clone(&changed))?;
        Ok(Self {
            path: path.to_path_buf(),
            every,
            last_check: Instant::now(),
            changed,
            _watcher: watcher,
        })
    }

    fn poll(&mut self, dispatcher: &Dispatcher, oversized: u64, queued: usize) {
        if self.last_check.elapsed() < self.every {
            return;
        }
        self.last_check = Instant::now();

        let stats = dispatcher.stats();
        log::info!(
            "Packets: {} | emitted: {} | suppressed: {} | unknown: {} | dropped: {} | oversized: {} | queued: {}",
            stats.packets,
            stats.emitted,
            stats.suppressed,
            stats.unknown_identifiers,
            stats.dropped(),
            oversized,
            queued
        );

        if !self.changed.swap(false, Ordering::AcqRel) {
            return;
        }

        log::info!("Config file changed, reloading: {:?}", self.path);
        match load_config(&self.path) {
            Ok((_, registry)) => dispatcher.reload(registry),
            Err(e) => log::error!("Reload rejected, keeping current definitions: {:#}", e),
        }
    }
}

/// Watch the directory holding `path` and raise `changed` when the file is
/// written or replaced. Editors often replace the file, so the directory is
/// watched rather than the file itself.
fn watch_file(path: &Path, changed: Arc<AtomicBool>) -> Result<RecommendedWatcher> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Config path has no file name: {:?}", path))?
        .to_os_string();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_change_to(&event, &file_name) {
                changed.store(true, Ordering::Release);
            }
        }
        Err(e) => log::warn!("Config watch error: {}", e),
    })
    .context("Failed to create config file watcher")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    log::debug!("Watching {:?} for config changes", dir);
    Ok(watcher)
}

fn is_change_to(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvl_decoder::{EmissionRecord, ListConfig, NvlConfig, Registry, UnknownIdentifierRecord, VariableConfig};
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::sync::Mutex;

    /// Publisher that records topics
    #[derive(Default)]
    struct Recorder {
        topics: Mutex<Vec<String>>,
    }

    impl Publisher for Recorder {
        fn publish_record(&self, record: &EmissionRecord) -> Result<()> {
            self.topics.lock().unwrap().push(record.topic.clone());
            Ok(())
        }

        fn publish_unknown(&self, record: &UnknownIdentifierRecord) -> Result<()> {
            self.topics.lock().unwrap().push(format!("unknown/{}", record.cob_id));
            Ok(())
        }
    }

    fn plc_dispatcher(on_change: bool) -> Dispatcher {
        let config = NvlConfig::new()
            .with_on_change(on_change)
            .with_header_bytes(2)
            .with_identifier(0, 2, "little")
            .add_list(ListConfig::new(5, "plc").add_variable(VariableConfig::new("x", "USINT")));
        Dispatcher::new(Registry::load(&config).unwrap())
    }

    #[test]
    fn test_publish_outcome_routes_records() {
        let dispatcher = plc_dispatcher(true);
        let recorder = Recorder::default();

        publish_outcome(&dispatcher.handle_packet(&[5, 0, 9]), &recorder);
        publish_outcome(&dispatcher.handle_packet(&[6, 0, 9]), &recorder);
        publish_outcome(&dispatcher.handle_packet(&[5, 0]), &recorder);

        assert_eq!(
            *recorder.topics.lock().unwrap(),
            vec!["plc/x".to_string(), "unknown/6".to_string()]
        );
    }

    #[test]
    fn test_oversized_datagram_is_not_truncated() {
        let max = 4;
        let buf = [1u8, 2, 3, 4, 5];
        assert_eq!(accept_datagram(&buf, 3, max), Some(&buf[..3]));
        assert_eq!(accept_datagram(&buf, 4, max), Some(&buf[..4]));
        // recv_from filled the spare byte: the datagram was longer than max
        assert_eq!(accept_datagram(&buf, 5, max), None);
    }

    #[test]
    fn test_worker_pool_handles_every_packet() {
        let dispatcher = Arc::new(plc_dispatcher(false));
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::spawn(3, 2, Arc::clone(&dispatcher), recorder.clone()).unwrap();

        for value in 0..50u8 {
            pool.submit(vec![5, 0, value]).unwrap();
        }
        pool.submit(vec![7, 0, 1]).unwrap();
        assert!(pool.queued() <= 2);
        pool.shutdown();

        let topics = recorder.topics.lock().unwrap();
        assert_eq!(topics.iter().filter(|t| *t == "plc/x").count(), 50);
        assert_eq!(topics.iter().filter(|t| *t == "unknown/7").count(), 1);
        assert_eq!(dispatcher.stats().packets, 51);
    }

    #[test]
    fn test_config_change_events() {
        let name = std::ffi::OsStr::new("nvl.toml");
        let event = |kind: EventKind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

        assert!(is_change_to(&event(EventKind::Modify(ModifyKind::Any), "/etc/nvl/nvl.toml"), name));
        assert!(is_change_to(&event(EventKind::Create(CreateKind::File), "./nvl.toml"), name));
        assert!(!is_change_to(&event(EventKind::Modify(ModifyKind::Any), "/etc/nvl/other.toml"), name));
        assert!(!is_change_to(&event(EventKind::Access(AccessKind::Any), "/etc/nvl/nvl.toml"), name));
    }
}
