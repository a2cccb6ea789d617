use std::error::Error as StdError;
use std::future::Future;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::Result;

struct Task {
    name: &'static str,
    future: BoxFuture<'static, Result<()>>,
}

/// Supervises the long-running parts of the process
///
/// Every task runs on its own tokio task inside a span named after it. A task
/// that fails is logged and does not take the others down.
#[derive(Default)]
pub struct Operator {
    tasks: Vec<Task>,
}

impl Operator {
    /// Creates an operator with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named task
    ///
    /// Chain multiple calls to run several tasks side by side.
    #[must_use]
    pub fn task<F>(mut self, name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(Task {
            name,
            future: Box::pin(future),
        });
        self
    }

    /// Runs every registered task
    ///
    /// Blocks until all tasks complete (typically on shutdown). Returns the
    /// number of tasks that failed.
    pub async fn run(self) -> usize {
        tracing::info!("starting operator with {} tasks", self.tasks.len());

        let mut set = JoinSet::new();

        for Task { name, future } in self.tasks {
            let span = tracing::info_span!("task", name);
            let task = async move {
                tracing::info!("starting task");
                let res = future.await;
                if let Err(err) = &res {
                    tracing::error!({ err = err as &dyn StdError }, "task error");
                }
                res
            };

            set.spawn(task.instrument(span));
        }

        let mut failed = 0;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(_)) => failed += 1,
                Err(err) => {
                    tracing::error!({ err = &err as &dyn StdError }, "task panicked");
                    failed += 1;
                }
            }
        }

        failed
    }
}
