use std::{
    io,
    sync::{
        mpsc::{self, Receiver, SyncSender},
        Arc,
    },
    thread,
};

use tracing::{debug, trace};

use super::{
    connection::{dispatch, Connection, ConnectionHandler},
    pool::WorkerPool,
};
use crate::{Error, Result};

/// Pool-side handle of a worker thread.
///
/// Dropping the last handle closes the worker's slot and lets its thread
/// exit.
pub(crate) struct WorkerHandle {
    id: usize,
    slot: SyncSender<Assignment>,
}

struct Assignment {
    conn: Connection,
    handle: WorkerHandle,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Publish `conn` to the worker. Blocks while the previous assignment
    /// is still in the slot.
    ///
    /// The handle travels with the connection so the worker can give itself
    /// back to the pool once it is done.
    pub(crate) fn assign(self, conn: Connection) -> Result<()> {
        let slot = self.slot.clone();
        let id = self.id;
        slot.send(Assignment { conn, handle: self }).map_err(|mpsc::SendError(lost)| {
            lost.conn.close();
            Error::Handoff(format!("worker {id} is gone"))
        })
    }
}

/// Start a worker thread bound to `pool`.
pub(crate) fn spawn(
    prefix: &str,
    id: usize,
    handler: Arc<dyn ConnectionHandler>,
    pool: Arc<WorkerPool<WorkerHandle>>,
) -> io::Result<WorkerHandle> {
    let (slot, inbox) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("{prefix}-exec-{id}"))
        .spawn(move || run(id, inbox, handler, pool))?;
    Ok(WorkerHandle { id, slot })
}

fn run(
    id: usize,
    inbox: Receiver<Assignment>,
    handler: Arc<dyn ConnectionHandler>,
    pool: Arc<WorkerPool<WorkerHandle>>,
) {
    debug!(worker = id, "worker started");
    while let Ok(Assignment { conn, handle }) = inbox.recv() {
        trace!(worker = id, peer = %conn.peer_addr(), "processing connection");
        dispatch(handler.as_ref(), conn);
        if !pool.release(handle) {
            break;
        }
    }
    debug!(worker = id, "worker exiting");
}
