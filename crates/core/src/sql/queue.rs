//! The queued SQL front door: statements are submitted to a single worker
//! task and answered through a future.
//!
//! A request's cancellation token can complete it in a cancelled state at
//! any point before the worker dequeues it; a statement that has started
//! executing is not interruptible. Dropping the queue stops the worker once
//! the current statement finishes.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{DbError, Result};
use crate::sql::{SqlResult, SqlRunner};

struct QueuedStatement {
    sql: String,
    database: Option<String>,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<SqlResult>>,
}

/// Handle for submitting statements to the worker.
pub struct SqlQueue {
    tx: mpsc::UnboundedSender<QueuedStatement>,
}

impl SqlQueue {
    /// Starts the worker task. Must be called within a tokio runtime.
    pub fn start(runner: SqlRunner) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedStatement>();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if request.cancel.is_cancelled() {
                    let _ = request.reply.send(Err(DbError::Cancelled));
                    continue;
                }
                let result = runner.run_on(request.database.as_deref(), &request.sql);
                let _ = request.reply.send(result);
            }
        });
        Self { tx }
    }

    /// Enqueues one statement.
    pub fn submit(&self, sql: impl Into<String>, database: Option<String>) -> impl std::future::Future<Output = Result<SqlResult>> {
        self.submit_with_token(sql, database, CancellationToken::new())
    }

    /// Enqueues one statement carrying a caller-held cancellation token.
    pub fn submit_with_token(
        &self,
        sql: impl Into<String>,
        database: Option<String>,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<SqlResult>> {
        let (reply, response) = oneshot::channel();
        let queued = self
            .tx
            .send(QueuedStatement {
                sql: sql.into(),
                database,
                cancel: cancel.clone(),
                reply,
            })
            .is_ok();
        async move {
            if !queued {
                return Err(DbError::Cancelled);
            }
            // The reply arm is polled first: a statement that already
            // executed reports its real outcome even when the token was
            // cancelled at the same moment. Cancellation only completes a
            // request the worker has not answered yet; the worker also
            // checks the token at dequeue.
            tokio::select! {
                biased;
                outcome = response => outcome.unwrap_or(Err(DbError::Cancelled)),
                _ = cancel.cancelled() => Err(DbError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::DatabaseManager;
    use crate::testing::Parent;

    fn queue() -> SqlQueue {
        let manager = DatabaseManager::new();
        manager.create_database("app").unwrap();
        manager.create_table::<Parent>("app", Some("Parents")).unwrap();
        SqlQueue::start(SqlRunner::new(manager).with_default_database("app"))
    }

    #[tokio::test]
    async fn submitted_statements_execute_in_order() {
        let queue = queue();
        queue
            .submit("INSERT INTO Parents (Name) VALUES ('A')", None)
            .await
            .unwrap();
        let result = queue.submit("SELECT * FROM Parents", None).await.unwrap();
        assert!(result.is_query);
        assert_eq!(result.affected_rows, 1);
    }

    #[tokio::test]
    async fn cancelled_before_dequeue_is_rejected() {
        let queue = queue();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = queue
            .submit_with_token("SELECT * FROM Parents", None, token)
            .await;
        assert!(matches!(outcome, Err(DbError::Cancelled)));
    }

    #[tokio::test]
    async fn completed_execution_is_not_reported_as_cancelled() {
        let queue = queue();
        let token = CancellationToken::new();
        // Enqueued on submit; the future is only collected later.
        let pending = queue.submit_with_token(
            "INSERT INTO Parents (Name) VALUES ('A')",
            None,
            token.clone(),
        );
        // The worker is FIFO, so once this statement answers, the insert
        // has executed and its reply is waiting.
        let seen = queue.submit("SELECT * FROM Parents", None).await.unwrap();
        assert_eq!(seen.affected_rows, 1);
        token.cancel();
        let outcome = pending.await.unwrap();
        assert!(!outcome.is_query);
        assert_eq!(outcome.affected_rows, 1);
    }

    #[tokio::test]
    async fn failures_surface_through_the_future() {
        let queue = queue();
        let outcome = queue.submit("SELECT * FROM Missing", None).await;
        assert!(outcome.is_err());
    }
}
