use std::{future::Future, pin::Pin, sync::Mutex, thread};

use logins_core::LoginsError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Single dedicated thread executing submitted jobs one at a time, in
/// submission order, on its own current-thread runtime.
///
/// Engine calls are blocking, so they run here rather than on the caller's
/// runtime. After [`Worker::shutdown`] queued jobs are dropped, callers still
/// waiting get `NotInitialized`, and a job already running finishes with its
/// result discarded.
pub struct Worker {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> Result<Self, LoginsError> {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(LoginsError::engine)?;
        let token = cancel.clone();
        let thread_name = name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(drain(receiver, token));
                debug!(worker = %thread_name, "worker stopped");
            })
            .map_err(LoginsError::engine)?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `job` on the worker thread and wait for its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, LoginsError>
    where
        F: Future<Output = Result<T, LoginsError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The caller may have given up; nothing to do with the result then.
            let _ = tx.send(job.await);
        });

        {
            let sender = self
                .sender
                .lock()
                .map_err(|e| LoginsError::engine(format!("lock poisoned: {e}")))?;
            let sender = sender.as_ref().ok_or(LoginsError::NotInitialized)?;
            sender.send(job).map_err(|_| LoginsError::NotInitialized)?;
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(LoginsError::NotInitialized),
            result = rx => result.unwrap_or(Err(LoginsError::NotInitialized)),
        }
    }

    /// Stop accepting jobs and abandon queued ones. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!(worker = %self.name, "shutting down worker");
        }
        self.cancel.cancel();
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain(mut receiver: mpsc::UnboundedReceiver<Job>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job.await,
                None => break,
            },
        }
    }
}
