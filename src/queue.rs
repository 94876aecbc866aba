use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::DispatchPolicy,
    dispatch::{dispatch, DispatchReport, Job},
    quota::HourlyQuota,
};

/// FIFO of submitted jobs, drained one job at a time by [`worker`]
#[derive(Default)]
pub struct SendQueue {
    jobs: Mutex<VecDeque<Job>>,
    wake: Notify,
}

impl SendQueue {
    pub fn push(&self, job: Job) {
        self.lock().push_back(job);
        self.wake.notify_one();
    }

    /// number of jobs waiting to be started
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// drop all jobs that have not started yet, returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut jobs = self.lock();
        let dropped = jobs.len();
        jobs.clear();

        dropped
    }

    fn pop(&self) -> Option<Job> {
        self.lock().pop_front()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// background task, runs queued jobs until the token is cancelled
pub(crate) async fn worker(
    queue: Arc<SendQueue>,
    quota: Arc<HourlyQuota>,
    policy: DispatchPolicy,
    token: CancellationToken,
    mut on_finished: impl FnMut(&Job, DispatchReport) + Send,
) -> crate::error::Result<&'static str> {
    info!("Send queue ready for jobs");

    loop {
        while let Some(job) = queue.pop() {
            info!(
                "starting job {} from {} to {} recipients",
                job.id,
                job.sender,
                job.recipients.len()
            );

            let report = dispatch(&job, &quota, &policy, &token).await;

            info!(
                "job {} finished: {} sent, {} failed, {} over hourly cap",
                job.id, report.sent, report.failed, report.skipped
            );
            on_finished(&job, report);

            if token.is_cancelled() {
                break;
            }
        }

        tokio::select! {
            _ = queue.wake.notified() => {},
            _ = token.cancelled() => {
                info!("Shutting down send queue");
                break;
            }
        }
    }

    Ok("send queue")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{tests::RecordingRelay, Letter};
    use tokio::{sync::mpsc, time::Duration};
    use uuid::Uuid;

    fn job(relay: Arc<RecordingRelay>, recipients: &[&str]) -> Job {
        Job {
            id: Uuid::new_v4(),
            sender: "sender@example.org".parse().unwrap(),
            relay,
            letter: Letter {
                sender_name: None,
                subject: "Status".to_owned(),
                body: "All systems nominal".to_owned(),
                footer: None,
            },
            recipients: recipients.iter().map(|r| r.parse().unwrap()).collect(),
        }
    }

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            batch_size: 1,
            batch_pause: Duration::from_secs(5),
            max_attempts: 1,
            backoff_base: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_in_order() {
        let queue = Arc::new(SendQueue::default());
        let relay = Arc::new(RecordingRelay::default());
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.push(job(relay.clone(), &["a@example.org", "b@example.org"]));
        queue.push(job(relay.clone(), &["c@example.org"]));

        tokio::spawn(worker(
            queue.clone(),
            Arc::new(HourlyQuota::new(10)),
            policy(),
            token.clone(),
            move |job, report| {
                let _ = tx.send((job.recipients.len(), report));
            },
        ));

        let (first, report) = rx.recv().await.unwrap();
        assert_eq!(first, 2);
        assert_eq!(report.sent, 2);
        let (second, _) = rx.recv().await.unwrap();
        assert_eq!(second, 1);

        assert_eq!(
            relay.delivered(),
            vec!["a@example.org", "b@example.org", "c@example.org"]
        );
        assert!(queue.is_empty());

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_pending_jobs() {
        let queue = SendQueue::default();
        let relay = Arc::new(RecordingRelay::default());

        queue.push(job(relay.clone(), &["a@example.org"]));
        queue.push(job(relay, &["b@example.org"]));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_wakes_for_late_jobs() {
        let queue = Arc::new(SendQueue::default());
        let relay = Arc::new(RecordingRelay::default());
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(worker(
            queue.clone(),
            Arc::new(HourlyQuota::new(10)),
            policy(),
            token.clone(),
            move |_, report| {
                let _ = tx.send(report);
            },
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.push(job(relay.clone(), &["late@example.org"]));

        let report = rx.recv().await.unwrap();
        assert_eq!(report.sent, 1);

        token.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), "send queue");
    }
}
