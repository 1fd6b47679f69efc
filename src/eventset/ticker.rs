//! Background thread of a running EventSet: rotates the software multiplexer and polls for
//! overflows.

use crate::eventset::SetInner;
use crate::{Error, Result};
use log::{debug, error, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct Ticker {
    tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start ticking. `rotate_every` drives multiplexing, `poll_every` overflow detection.
    pub(crate) fn spawn(
        id: usize,
        inner: Arc<Mutex<SetInner>>,
        hz: f64,
        rotate_every: Option<Duration>,
        poll_every: Option<Duration>,
    ) -> Result<Self> {
        let period = match (rotate_every, poll_every) {
            (Some(r), Some(p)) => r.min(p),
            (Some(r), None) => r,
            (None, Some(p)) => p,
            (None, None) => return Err(Error::Bug),
        };
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(format!("papi-eventset-{}", id))
            .spawn(move || _run(inner, rx, hz, period, rotate_every))?;
        debug!("Ticker of EventSet {} every {:?}", id, period);
        Ok(Ticker {
            tx,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it.
    pub(crate) fn stop(mut self) {
        self._stop();
    }

    fn _stop(&mut self) {
        let _ = self.tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("EventSet ticker panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self._stop();
    }
}

fn _run(
    inner: Arc<Mutex<SetInner>>,
    rx: mpsc::Receiver<()>,
    hz: f64,
    period: Duration,
    rotate_every: Option<Duration>,
) {
    let mut last_rotate = Instant::now();
    loop {
        match rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        let rotate = match rotate_every {
            Some(every) if last_rotate.elapsed() >= every => {
                last_rotate = Instant::now();
                true
            }
            _ => false,
        };

        // The handler runs without the lock held.
        let (events, handler) = {
            let mut guard = match inner.lock() {
                Ok(g) => g,
                Err(_) => break,
            };
            match guard.tick(rotate, hz) {
                Ok(events) if !events.is_empty() => {
                    let handler = guard.handler.0.take();
                    (events, handler)
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("EventSet {} tick failed: {}", guard.id, e);
                    continue;
                }
            }
        };
        if let Some(mut handler) = handler {
            for ev in events.iter() {
                handler(ev);
            }
            match inner.lock() {
                Ok(mut guard) if guard.handler.0.is_none() => guard.handler.0 = Some(handler),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
}
