//! Runs blocking jobs on background threads and hands their results back to
//! the UI thread, which drains them once per frame.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type Notifier = Arc<dyn Fn() + Send + Sync>;

pub struct Worker<T: Send + 'static> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    pending: Arc<AtomicUsize>,
    notify: Option<Notifier>,
}

impl<T: Send + 'static> Default for Worker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Worker<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: Arc::new(AtomicUsize::new(0)),
            notify: None,
        }
    }

    /// Called from the job thread after each result is sent, e.g. to wake
    /// the UI.
    pub fn with_notifier(mut self, notify: impl Fn() + Send + Sync + 'static) -> Self {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub fn spawn<F>(&self, job: F) -> std::io::Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = self.sender.clone();
        let pending = Arc::clone(&self.pending);
        let notify = self.notify.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("lingo-worker".to_string())
            .spawn(move || {
                let result = job();
                pending.fetch_sub(1, Ordering::SeqCst);
                if sender.send(result).is_err() {
                    tracing::debug!("worker result dropped, receiver gone");
                }
                if let Some(notify) = notify {
                    notify();
                }
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(error = %e, "failed to spawn worker thread");
                Err(e)
            }
        }
    }

    /// Every result that has arrived so far, without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Jobs still running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    fn wait_for<T: Send + 'static>(worker: &Worker<T>, count: usize) -> Vec<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < count && Instant::now() < deadline {
            results.extend(worker.drain());
            thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn results_come_back_through_drain() {
        let worker = Worker::new();
        for n in 0..3u32 {
            worker.spawn(move || n * 10).unwrap();
        }
        let mut results = wait_for(&worker, 3);
        results.sort();
        assert_eq!(results, vec![0, 10, 20]);
        assert_eq!(worker.pending(), 0);
        assert!(worker.drain().is_empty());
    }

    #[test]
    fn notifier_runs_after_delivery() {
        let woke = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&woke);
        let worker = Worker::new().with_notifier(move || flag.store(true, Ordering::SeqCst));
        worker.spawn(|| "done").unwrap();
        assert_eq!(wait_for(&worker, 1), vec!["done"]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !woke.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(woke.load(Ordering::SeqCst));
    }
}
