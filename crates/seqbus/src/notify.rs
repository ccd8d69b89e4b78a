//! Change notifications from control services.
//!
//! An [`ElementWatcher`] runs a service's `process_events` wherever the
//! caller polls it and only enqueues what changed. A single
//! [`NotificationDispatcher`] drains the channel and runs the callbacks.
//! Each callback runs inside its own `notify_callback` span, and panics or
//! errors stop at that boundary as a negative status code.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::services::{ControlService, ElementChange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub service: String,
    pub change: ElementChange,
}

/// A callback's verdict; 0 is success, anything else a negative errno.
pub type Status = i32;

type Callback = Box<dyn FnMut(&Notification) -> Result<()> + Send>;

/// Create a connected watcher-side sender and dispatcher.
pub fn channel() -> (UnboundedSender<Notification>, NotificationDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, NotificationDispatcher::new(rx))
}

pub struct ElementWatcher<S: ControlService> {
    service: S,
    tx: UnboundedSender<Notification>,
}

impl<S: ControlService> ElementWatcher<S> {
    pub fn new(service: S, tx: UnboundedSender<Notification>) -> Self {
        Self { service, tx }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// Process the service's pending events and enqueue one notification
    /// per change. Returns how many were enqueued.
    pub fn process_events(&mut self) -> Result<usize> {
        let changes = self.service.process_events()?;
        let mut sent = 0;
        for change in changes {
            let note = Notification {
                service: self.service.name().to_string(),
                change,
            };
            if self.tx.send(note).is_err() {
                warn!(service = self.service.name(), "notification dispatcher is gone");
                break;
            }
            sent += 1;
        }
        Ok(sent)
    }
}

struct Registration {
    /// Only this element, or every element when `None`.
    element: Option<String>,
    callback: Callback,
}

pub struct NotificationDispatcher {
    rx: UnboundedReceiver<Notification>,
    registrations: Vec<Registration>,
}

impl NotificationDispatcher {
    pub fn new(rx: UnboundedReceiver<Notification>) -> Self {
        Self {
            rx,
            registrations: Vec::new(),
        }
    }

    /// Call `callback` for every change.
    pub fn on_change<F>(&mut self, callback: F)
    where
        F: FnMut(&Notification) -> Result<()> + Send + 'static,
    {
        self.registrations.push(Registration {
            element: None,
            callback: Box::new(callback),
        });
    }

    /// Call `callback` for changes to `element` only.
    pub fn on_element<F>(&mut self, element: &str, callback: F)
    where
        F: FnMut(&Notification) -> Result<()> + Send + 'static,
    {
        self.registrations.push(Registration {
            element: Some(element.to_string()),
            callback: Box::new(callback),
        });
    }

    /// Run every matching callback for one notification, in registration
    /// order. Returns each callback's status.
    pub fn dispatch(&mut self, note: &Notification) -> Vec<Status> {
        self.registrations
            .iter_mut()
            .filter(|r| r.element.as_deref().map_or(true, |e| e == note.change.element))
            .map(|r| invoke(&mut r.callback, note))
            .collect()
    }

    /// Dispatch everything already queued without waiting. Returns the
    /// statuses of all callbacks run.
    pub fn dispatch_pending(&mut self) -> Vec<Status> {
        let mut statuses = Vec::new();
        while let Ok(note) = self.rx.try_recv() {
            statuses.extend(self.dispatch(&note));
        }
        statuses
    }

    /// Dispatch until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(note) = self.rx.recv().await {
            let failed = self.dispatch(&note).into_iter().filter(|s| *s != 0).count();
            if failed > 0 {
                debug!(element = %note.change.element, failed, "callbacks reported errors");
            }
        }
        debug!("notification channel closed");
    }
}

fn invoke(callback: &mut Callback, note: &Notification) -> Status {
    let span = tracing::debug_span!(
        "notify_callback",
        service = %note.service,
        element = %note.change.element,
    );
    let _entered = span.enter();

    match panic::catch_unwind(AssertUnwindSafe(|| callback(note))) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            let status = e.driver_code().filter(|c| *c < 0).unwrap_or(-libc::EINVAL);
            warn!(status, "notification callback failed: {}", e);
            status
        }
        Err(_) => {
            error!("notification callback panicked");
            -libc::EIO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, SeqError};
    use crate::services::MemoryControls;
    use std::sync::{Arc, Mutex};

    fn change(element: &str, value: i64) -> Notification {
        Notification {
            service: "desk".to_string(),
            change: ElementChange {
                element: element.to_string(),
                value,
            },
        }
    }

    #[test]
    fn test_statuses_at_the_boundary() {
        let (_tx, mut dispatcher) = channel();
        dispatcher.on_change(|_| Ok(()));
        dispatcher.on_change(|_| {
            Err(SeqError::Service {
                service: "desk".to_string(),
                source: DriverError::from_errno(-libc::EBUSY),
            })
        });
        dispatcher.on_change(|_| panic!("callback blew up"));
        dispatcher.on_change(|_| Err(SeqError::InvalidMode(9)));

        let statuses = dispatcher.dispatch(&change("Master", 1));
        assert_eq!(statuses, vec![0, -libc::EBUSY, -libc::EIO, -libc::EINVAL]);
    }

    #[test]
    fn test_element_filter() {
        let (_tx, mut dispatcher) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.on_element("PCM", move |n| {
            sink.lock().unwrap().push(n.change.value);
            Ok(())
        });

        dispatcher.dispatch(&change("Master", 1));
        dispatcher.dispatch(&change("PCM", 2));
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_watcher_feeds_dispatcher() {
        let (tx, mut dispatcher) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.on_change(move |n| {
            sink.lock().unwrap().push((n.change.element.clone(), n.change.value));
            Ok(())
        });

        let controls = MemoryControls::new("desk").with_element("Master", 0);
        let mut watcher = ElementWatcher::new(controls, tx);
        watcher.service_mut().external_change("Master", 42).unwrap();
        assert_eq!(watcher.process_events().unwrap(), 1);
        assert_eq!(watcher.process_events().unwrap(), 0);

        assert_eq!(dispatcher.dispatch_pending(), vec![0]);
        assert_eq!(*seen.lock().unwrap(), vec![("Master".to_string(), 42)]);
    }

    #[tokio::test]
    async fn test_run_drains_until_senders_drop() {
        let (tx, mut dispatcher) = channel();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        dispatcher.on_change(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let task = tokio::spawn(dispatcher.run());
        tx.send(change("Master", 1)).unwrap();
        tx.send(change("Master", 2)).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
