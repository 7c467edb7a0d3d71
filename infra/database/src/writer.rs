use std::path::PathBuf;
use std::sync::mpsc;

use rusqlite::Connection;

use crate::error::StoreError;
use crate::pragmas::{apply_pragmas, ensure_schema};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// The single writable connection, owned by one dedicated OS thread.
///
/// Mirrors the original `DbWriter`: every mutation is a job pushed onto a
/// channel and drained in order by one thread, each wrapped in its own SQL
/// transaction. Serializing all writes this way also gives `take_over` its
/// exclusive critical section for free, since the job that selects and
/// marks candidates runs to completion before the next job starts.
pub struct Writer {
    sender: Option<mpsc::Sender<Job>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Writer {
    pub fn spawn(path: PathBuf) -> Result<Self, StoreError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StoreError>>();

        let handle = std::thread::Builder::new()
            .name("storm-tape-db-writer".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path)
                    .map_err(|source| StoreError::Sqlite { source, context: Some("opening writer connection".into()) })
                    .and_then(|conn| {
                        apply_pragmas(&conn)?;
                        ensure_schema(&conn)?;
                        Ok(conn)
                    }) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        return;
                    }
                };

                for job in receiver {
                    job(&mut conn);
                }
            })
            .map_err(|source| StoreError::Internal {
                message: format!("failed to spawn database writer thread: {source}").into(),
                context: None,
            })?;

        ready_rx
            .recv()
            .map_err(|_| StoreError::WriterGone)??;

        Ok(Self { sender: Some(sender), handle: Some(handle) })
    }

    /// Runs `f` inside a transaction on the writer thread and blocks until it
    /// commits (or rolls back on error), returning `f`'s result.
    pub fn submit<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel::<Result<T, StoreError>>();

        let job: Job = Box::new(move |conn| {
            let outcome = (|| {
                let tx = conn
                    .transaction()
                    .map_err(|source| StoreError::Sqlite { source, context: Some("opening transaction".into()) })?;
                let result = f(&tx)?;
                tx.commit()
                    .map_err(|source| StoreError::Sqlite { source, context: Some("committing transaction".into()) })?;
                Ok(result)
            })();
            let _ = reply_tx.send(outcome);
        });

        self.sender
            .as_ref()
            .ok_or(StoreError::WriterGone)?
            .send(job)
            .map_err(|_| StoreError::WriterGone)?;
        reply_rx.recv().map_err(|_| StoreError::WriterGone)?
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // Drop the sender first: this closes the channel, which ends the
        // writer thread's `for job in receiver` loop so the join below
        // doesn't block forever.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer").finish_non_exhaustive()
    }
}
