// src/services/notify.rs

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

/// Outbound notification jobs. Fire-and-forget: delivery failure must never
/// fail the operation that triggered the job.
#[derive(Debug, Clone)]
pub enum NotificationJob {
    ViolationDigest {
        exam_id: Uuid,
        student_id: Uuid,
        message: String,
    },
    ResultsPublished {
        exam_id: Uuid,
        title: String,
    },
}

/// Boundary to the outbound notification transport (email, etc.).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, job: NotificationJob) -> Result<(), AppError>;
}

/// Default implementation: records the job in the log. Deployments wire a
/// real transport here.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, job: NotificationJob) -> Result<(), AppError> {
        match job {
            NotificationJob::ViolationDigest {
                exam_id,
                student_id,
                message,
            } => {
                tracing::info!(
                    "notification: violation digest for student {} on exam {}: {}",
                    student_id,
                    exam_id,
                    message
                );
            }
            NotificationJob::ResultsPublished { exam_id, title } => {
                tracing::info!("notification: results published for exam {} ({})", exam_id, title);
            }
        }
        Ok(())
    }
}

/// Spawns delivery in the background; errors are logged and swallowed.
pub fn enqueue(notifier: Arc<dyn Notifier>, job: NotificationJob) {
    tokio::spawn(async move {
        if let Err(e) = notifier.deliver(job.clone()).await {
            tracing::warn!("notification delivery failed: {} ({:?})", e, job);
        }
    });
}
