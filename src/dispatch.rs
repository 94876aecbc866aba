//! The send pipeline: recipients are split into batches, each batch is sent
//! concurrently, failed messages are retried with exponential backoff and every
//! delivered message counts against the sender's hourly quota.

use futures::future::join_all;
use lettre::{
    message::{header::ContentType, Mailbox},
    Address, Message,
};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::DispatchPolicy,
    error::Result,
    quota::HourlyQuota,
    relay::Relay,
};

/// recipients accepted from a submitted list, plus the entries that were rejected
#[derive(Debug, Default, PartialEq)]
pub struct RecipientList {
    pub valid: Vec<Address>,
    pub invalid: Vec<String>,
}

/// split a newline or comma separated list, dropping blanks and duplicates
pub fn parse_recipients(text: &str) -> RecipientList {
    let mut list = RecipientList::default();
    let mut seen = HashSet::new();

    for entry in text.split(['\n', '\r', ',']).map(str::trim) {
        if entry.is_empty() {
            continue;
        }

        match entry.parse::<Address>() {
            Ok(address) => {
                if seen.insert(address.to_string().to_ascii_lowercase()) {
                    list.valid.push(address);
                }
            }
            Err(_) => list.invalid.push(entry.to_owned()),
        }
    }

    list
}

pub fn batches<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// the message content shared by every recipient of a job
#[derive(Clone, Debug)]
pub struct Letter {
    pub sender_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub footer: Option<String>,
}

impl Letter {
    pub fn to_message(&self, sender: &Address, recipient: &Address) -> Result<Message> {
        let name = self
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let text = match &self.footer {
            Some(footer) => format!("{}\n\n{}", self.body, footer),
            None => self.body.clone(),
        };

        let message = Message::builder()
            .from(Mailbox::new(name, sender.clone()))
            .to(Mailbox::new(None, recipient.clone()))
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(text)?;

        Ok(message)
    }
}

/// one submitted send request
pub struct Job {
    pub id: Uuid,
    pub sender: Address,
    pub relay: Arc<dyn Relay>,
    pub letter: Letter,
    pub recipients: Vec<Address>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    /// recipients not attempted because the hourly cap was reached
    pub skipped: usize,
    pub cancelled: bool,
}

/// try to send a message up to `max_attempts` times, doubling the wait between attempts
pub async fn send_with_retry(
    relay: &dyn Relay,
    message: &Message,
    policy: &DispatchPolicy,
) -> Result<u32> {
    let mut attempt = 1;

    loop {
        match relay.send(message.clone()).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= policy.max_attempts => {
                warn!("giving up after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let wait = policy.backoff(attempt);
                debug!("attempt {attempt} failed ({e}), retrying in {wait:?}");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

enum Outcome {
    Sent,
    Failed,
    Skipped,
}

async fn deliver(
    job: &Job,
    recipient: &Address,
    quota: &HourlyQuota,
    policy: &DispatchPolicy,
) -> Outcome {
    let sender = job.sender.as_ref();

    if let Err(exceeded) = quota.try_reserve(sender) {
        debug!(
            "hourly cap reached for {sender}, skipping {recipient} (resets in {:?})",
            exceeded.retry_after
        );
        return Outcome::Skipped;
    }

    let message = match job.letter.to_message(&job.sender, recipient) {
        Ok(message) => message,
        Err(e) => {
            warn!("could not build message for {recipient}: {e}");
            quota.release(sender);
            return Outcome::Failed;
        }
    };

    match send_with_retry(job.relay.as_ref(), &message, policy).await {
        Ok(_) => Outcome::Sent,
        Err(e) => {
            warn!("send to {recipient} failed: {e}");
            quota.release(sender);
            Outcome::Failed
        }
    }
}

/// run a job to completion, pausing between batches
pub async fn dispatch(
    job: &Job,
    quota: &HourlyQuota,
    policy: &DispatchPolicy,
    token: &CancellationToken,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let groups = batches(&job.recipients, policy.batch_size);
    let total = groups.len();

    for (index, batch) in groups.into_iter().enumerate() {
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let outcomes = join_all(
            batch
                .iter()
                .map(|recipient| deliver(job, recipient, quota, policy)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            "job {} batch {}/{total} done, {} sent so far",
            job.id,
            index + 1,
            report.sent
        );

        if index + 1 < total {
            tokio::select! {
                _ = tokio::time::sleep(policy.batch_pause) => {},
                _ = token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
            }
        }
    }

    report
}
