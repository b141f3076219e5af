// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Named worker threads hosting filters.
//!
//! Every thread runs a serial event loop over three channels: shutdown,
//! runtime tasks (filter construction, lifecycle transitions) and executor
//! wake-ups. Because the loop is serial, everything that touches a filter
//! happens on its owning thread without further coordination.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::core::environment::{self, FilterEnvironment};
use crate::core::error::{FlowError, Result};
use crate::core::executor::{Executor, WakeupEvent};

type ThreadTask = Box<dyn FnOnce(&mut ThreadWorker) + Send + 'static>;

/// Per-thread state owned by the worker loop.
pub(crate) struct ThreadWorker {
    name: String,
    executor: Arc<Executor>,
    environments: Vec<Arc<Mutex<FilterEnvironment>>>,
}

impl ThreadWorker {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub(crate) fn register_environment(&mut self, env: Arc<Mutex<FilterEnvironment>>) {
        self.environments.push(env);
    }

    /// Environments in registration order.
    pub(crate) fn environments(&self) -> &[Arc<Mutex<FilterEnvironment>>] {
        &self.environments
    }

    /// Destroy all hosted filters (Destructing -> Destructed) and drop them.
    pub(crate) fn destruct_environments(&mut self) {
        for env in self.environments.drain(..) {
            environment::destruct(&env);
        }
    }
}

/// Handle to one named worker thread.
pub struct ThreadHandle {
    name: String,
    executor: Arc<Executor>,
    task_tx: Sender<ThreadTask>,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    fn spawn(name: &str) -> Result<Self> {
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<ThreadTask>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (wakeup_tx, wakeup_rx) = crossbeam_channel::unbounded::<WakeupEvent>();
        let executor = Arc::new(Executor::new(wakeup_tx));
        let loop_executor = Arc::clone(&executor);
        let loop_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker_loop(loop_name, loop_executor, task_rx, shutdown_rx, wakeup_rx))
            .map_err(|e| FlowError::ThreadUnavailable(format!("{name}: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            executor,
            task_tx,
            shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&self.executor)
    }

    /// Enqueue a task without waiting; the receiver yields its result.
    pub(crate) fn submit<R, F>(&self, f: F) -> Result<Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut ThreadWorker) -> R + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let task: ThreadTask = Box::new(move |worker| {
            let _ = tx.send(f(worker));
        });
        self.task_tx
            .send(task)
            .map_err(|_| FlowError::ThreadUnavailable(self.name.clone()))?;
        Ok(rx)
    }

    /// Run a task on the worker thread and wait for its result.
    pub(crate) fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ThreadWorker) -> R + Send + 'static,
    {
        let rx = self.submit(f)?;
        rx.recv()
            .map_err(|_| FlowError::ThreadUnavailable(self.name.clone()))
    }
}

fn run_worker_loop(
    name: String,
    executor: Arc<Executor>,
    task_rx: Receiver<ThreadTask>,
    shutdown_rx: Receiver<()>,
    wakeup_rx: Receiver<WakeupEvent>,
) {
    tracing::debug!("[{}] worker thread started", name);
    let mut worker = ThreadWorker {
        name: name.clone(),
        executor,
        environments: Vec::new(),
    };
    loop {
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => break,
            recv(task_rx) -> msg => match msg {
                Ok(task) => task(&mut worker),
                Err(_) => break,
            },
            recv(wakeup_rx) -> msg => match msg {
                Ok(WakeupEvent::PendingReceives) => worker.executor.multi_step(),
                Err(_) => break,
            },
        }
    }
    worker.executor.clear();
    tracing::debug!("[{}] worker thread stopped", name);
}

/// Named worker threads, spawned on demand, in first-use order.
pub struct ThreadPool {
    threads: Vec<ThreadHandle>,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self {
            threads: Vec::new(),
        }
    }

    /// Look up the thread hosting `name`, spawning it on first use.
    pub fn get_or_spawn(&mut self, name: &str) -> Result<&ThreadHandle> {
        if let Some(index) = self.threads.iter().position(|t| t.name == name) {
            return Ok(&self.threads[index]);
        }
        let handle = ThreadHandle::spawn(name)?;
        self.threads.push(handle);
        let index = self.threads.len() - 1;
        Ok(&self.threads[index])
    }

    pub fn get(&self, name: &str) -> Option<&ThreadHandle> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadHandle> {
        self.threads.iter()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Stop executors, signal every loop and join the threads.
    pub fn shutdown(&mut self) {
        for handle in &self.threads {
            handle.executor.clear();
            let _ = handle.shutdown_tx.send(());
        }
        let thread_count = self.threads.len();
        for (i, handle) in self.threads.iter_mut().enumerate() {
            if let Some(thread) = handle.thread.take() {
                match thread.join() {
                    Ok(()) => tracing::debug!(
                        "[{}] thread joined ({}/{})",
                        handle.name,
                        i + 1,
                        thread_count
                    ),
                    Err(e) => tracing::error!(
                        "[{}] thread panicked ({}/{}): {:?}",
                        handle.name,
                        i + 1,
                        thread_count,
                        e
                    ),
                }
            }
        }
        self.threads.clear();
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
