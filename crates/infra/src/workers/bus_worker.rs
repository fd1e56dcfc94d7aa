use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use dentaflow_core::ClinicId;
use dentaflow_events::{ClinicScoped, EventBus, Subscription};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop and wait for its thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!(worker = self.name, "bus worker panicked");
            }
        }
    }
}

/// A thread draining one bus subscription into a handler.
///
/// Delivery is at-least-once, so handlers must tolerate duplicates. Handler
/// failures are logged and the loop keeps going.
#[derive(Debug)]
pub struct BusWorker;

impl BusWorker {
    /// Subscribe to `bus` and spawn the worker thread.
    ///
    /// With `clinic_id` set, messages of other clinics are skipped. The
    /// subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        clinic_id: Option<ClinicId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: ClinicScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, subscription, shutdown_rx, clinic_id, &mut handler))?;

        tracing::info!(worker = name, "bus worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn run<M, H, E>(
    name: &'static str,
    subscription: Subscription<M>,
    shutdown: mpsc::Receiver<()>,
    clinic_id: Option<ClinicId>,
    handler: &mut H,
) where
    M: ClinicScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => {
                if clinic_id.is_some_and(|c| !msg.is_for(c)) {
                    continue;
                }
                let msg_clinic = msg.clinic_id();
                if let Err(err) = handler(msg) {
                    tracing::warn!(worker = name, clinic_id = %msg_clinic, error = %err, "bus worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!(worker = name, "bus worker stopped");
}
