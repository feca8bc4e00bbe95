//! Minimal event loop that runs deferred calls on the thread calling `exec`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Exit status returned by `exec` when the timeout expires.
pub const TIMEOUT_EXIT_STATUS: i32 = 0;

type Call = Box<dyn FnOnce() + Send>;

enum Event {
    Call(Call),
    Exit(i32),
}

/// Sendable handle for posting work to an `EventLoop` from other threads.
#[derive(Clone)]
pub struct LoopHandle {
    sender: Sender<Event>,
}

impl LoopHandle {
    /// Run `f` on the loop thread during `exec`.
    pub fn call_later<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Event::Call(Box::new(f))).is_err() {
            log::debug!("event loop gone, dropping deferred call");
        }
    }

    /// Make `exec` return `code` once earlier events are handled.
    pub fn exit(&self, code: i32) {
        if self.sender.send(Event::Exit(code)).is_err() {
            log::debug!("event loop gone, dropping exit request");
        }
    }
}

/// Runs deferred calls in order until exit or timeout.
pub struct EventLoop {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    timeout: Option<Duration>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create an event loop without timeout.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            timeout: None,
        }
    }

    /// Handle that other threads use to post to this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run `f` on the loop thread during `exec`.
    pub fn call_later<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().call_later(f);
    }

    /// Make `exec` return `code`.
    pub fn exit(&self, code: i32) {
        self.handle().exit(code);
    }

    /// Stop `exec` after `duration`, measured from the start of `exec`.
    pub fn timeout(&mut self, duration: Duration) {
        self.timeout = Some(duration);
    }

    /// Dispatch events until `exit` is called or the timeout expires.
    ///
    /// Returns the exit code, or `TIMEOUT_EXIT_STATUS` on timeout.
    pub fn exec(&mut self) -> i32 {
        // A timeout too large to represent is the same as no timeout.
        let deadline = self
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            let event = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    // Pending events must not keep the loop alive past the deadline.
                    if now >= deadline {
                        return TIMEOUT_EXIT_STATUS;
                    }
                    let remaining = deadline.saturating_duration_since(now);
                    match self.receiver.recv_timeout(remaining) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                            return TIMEOUT_EXIT_STATUS;
                        }
                    }
                }
                // The loop owns a sender, so the channel never disconnects.
                None => match self.receiver.recv() {
                    Ok(event) => event,
                    Err(_) => return TIMEOUT_EXIT_STATUS,
                },
            };

            match event {
                Event::Call(call) => call(),
                Event::Exit(code) => return code,
            }
        }
    }

    /// Drop events posted after `exec` returned. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.receiver.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_exec_runs_calls_in_order_until_exit() {
        let mut event_loop = EventLoop::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            event_loop.call_later(move || log.lock().expect("lock").push(i));
        }
        event_loop.exit(7);

        assert_eq!(event_loop.exec(), 7);
        assert_eq!(*log.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[test]
    fn test_exec_times_out() {
        let mut event_loop = EventLoop::new();
        event_loop.timeout(Duration::from_millis(20));

        let started = Instant::now();
        assert_eq!(event_loop.exec(), TIMEOUT_EXIT_STATUS);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_handle_posts_from_other_thread() {
        let mut event_loop = EventLoop::new();
        event_loop.timeout(Duration::from_secs(5));
        let handle = event_loop.handle();
        let count = Arc::new(AtomicU32::new(0));

        let worker_count = Arc::clone(&count);
        let worker = thread::spawn(move || {
            for _ in 0..5 {
                let count = Arc::clone(&worker_count);
                handle.call_later(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
            handle.exit(0);
        });

        assert_eq!(event_loop.exec(), 0);
        worker.join().expect("worker panicked");
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_timeout_holds_under_steady_load() {
        let mut event_loop = EventLoop::new();
        event_loop.timeout(Duration::from_millis(100));
        let handle = event_loop.handle();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        // Each call takes longer than the gap between posts, so the queue
        // never drains.
        let producer_done = Arc::clone(&done);
        let producer = thread::spawn(move || {
            while !producer_done.load(Ordering::SeqCst) {
                handle.call_later(|| thread::sleep(Duration::from_millis(5)));
                thread::sleep(Duration::from_millis(1));
            }
        });

        let started = Instant::now();
        assert_eq!(event_loop.exec(), TIMEOUT_EXIT_STATUS);
        let elapsed = started.elapsed();
        done.store(true, Ordering::SeqCst);
        producer.join().expect("producer panicked");

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(1), "exec ran {elapsed:?}");
        assert!(event_loop.clear() > 0);
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let mut event_loop = EventLoop::new();
        event_loop.timeout(Duration::from_secs(u64::MAX));
        event_loop.exit(3);

        assert_eq!(event_loop.exec(), 3);
    }

    #[test]
    fn test_clear_drops_late_events() {
        let mut event_loop = EventLoop::new();
        event_loop.exit(0);
        event_loop.call_later(|| {});
        event_loop.call_later(|| {});

        assert_eq!(event_loop.exec(), 0);
        assert_eq!(event_loop.clear(), 2);
    }
}
