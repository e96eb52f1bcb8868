use std::{
    cmp::min,
    collections::VecDeque,
    fs::File,
    io::{BufWriter, Read, Seek, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex,
    },
    thread,
};

use crate::{
    error::try_store, layer::LayerDescriptor, platform::Platform, registry::Registry,
    EventHandler, PullError,
};

use super::CancelToken;

/// Content of a layer, ready to be written to the store.
pub(super) enum Staged {
    /// The layer is already in the store.
    Present,

    /// The layer was downloaded and verified. The file is at offset 0.
    File(File),
}

/// Dependencies for the download threads.
pub(super) struct Downloader<'a> {
    pub registry: &'a dyn Registry,
    pub platform: &'a dyn Platform,
    pub event_handler: &'a dyn EventHandler,
    pub cancel_token: &'a CancelToken,
    pub concurrency: usize,
}

pub(super) struct Download<'a> {
    pub layer: &'a LayerDescriptor,
    present: bool,
    result: Mutex<Option<Result<Staged, PullError>>>,
    notifier: Condvar,
}

impl<'a> Download<'a> {
    /// Create a task for `layer`. If `present` is `true`, the layer is
    /// not downloaded.
    pub fn new(layer: &'a LayerDescriptor, present: bool) -> Self {
        Self {
            layer,
            present,
            result: Default::default(),
            notifier: Condvar::new(),
        }
    }

    /// Store the result of a download operation, and notify
    /// any waiting thread.
    fn complete(&self, result: Result<Staged, PullError>) {
        let mut lock = self.result.lock().unwrap();
        *lock = Some(result);
        self.notifier.notify_one();
    }

    /// Wait until the result of a download is ready.
    fn get(&self) -> Result<Staged, PullError> {
        if self.present {
            return Ok(Staged::Present);
        }

        let mut lock = self.result.lock().unwrap();
        loop {
            lock = match lock.take() {
                Some(r) => return r,
                None => self.notifier.wait(lock).unwrap(),
            }
        }
    }
}

impl Downloader<'_> {
    /// Download the layers in `tasks` in a thread pool, and send them to
    /// `commit` in the same order as `tasks`.
    ///
    /// If `commit` fails, the pending downloads are interrupted.
    pub fn run<F>(&self, tasks: &[Download], mut commit: F) -> Result<(), PullError>
    where
        F: FnMut(&Download, Staged) -> Result<(), PullError>,
    {
        let is_alive = AtomicBool::new(true);

        let pending: VecDeque<_> = tasks.iter().filter(|t| !t.present).collect();
        let threads = min(self.concurrency.max(1), pending.len());
        let pending = Mutex::new(pending);

        thread::scope(|scope| {
            let alive_tracker = AliveTracker(&is_alive);

            for _ in 0..threads {
                scope.spawn(|| {
                    while let Ok(Some(task)) = pending.lock().map(|mut q| q.pop_front()) {
                        task.complete(self.download(task.layer, &is_alive));
                    }
                });
            }

            for task in tasks {
                commit(task, task.get()?)?;
            }

            drop(alive_tracker);

            Ok(())
        })
    }

    /// Download a layer to a temporary file.
    fn download(
        &self,
        layer: &LayerDescriptor,
        is_alive: &AtomicBool,
    ) -> Result<Staged, PullError> {
        let digest = &layer.digest;
        let context = || format!("layer {digest}");

        let interrupted =
            || !is_alive.load(Ordering::Relaxed) || self.cancel_token.is_cancelled();

        if interrupted() {
            return Err(PullError::Cancelled);
        }

        tracing::debug!(%digest, size = layer.size, "Layer download");
        self.event_handler.layer_download_start(digest, layer.size);

        let input = self
            .platform
            .open_layer(layer, self.registry, self.event_handler)?;

        let mut input = digest.wrap_reader(input);

        let mut file = try_store!(context(), tempfile::tempfile());

        let mut data = [0u8; 8 * 1024];
        let mut output = BufWriter::new(&mut file);

        loop {
            if interrupted() {
                return Err(PullError::Cancelled);
            }

            let n = input
                .read(&mut data[..])
                .map_err(|e| PullError::transfer_io(context(), e))?;

            if n == 0 {
                break;
            }

            self.event_handler.download_progress_bytes(n);

            try_store!(context(), output.write_all(&data[..n]));
        }

        try_store!(context(), output.flush());
        drop(output);

        try_store!(context(), file.rewind());

        Ok(Staged::File(file))
    }
}

/// Set the `AtomicBool` instance to `false` when this instance is
/// dropped (for example, after `panic!`).
struct AliveTracker<'a>(&'a AtomicBool);

impl Drop for AliveTracker<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
