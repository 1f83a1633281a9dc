use crate::db::{BallotStore, PollStore};
use crate::directory::Directory;
use crate::models::Poll;
use crate::notify::NotificationSink;
use crate::quorum::{Decision, QuorumPolicy, Turnout};
use crate::tasks::periodic::{DAILY, PeriodicTask, until_next_midnight};
use chrono::{DateTime, Local, Utc};
use log::{debug, error, info, warn};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// What one evaluation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub evaluated: usize,
    pub reminders_sent: usize,
    pub closed: Vec<String>,
    pub skipped: usize,
    pub announced: bool,
}

/// Drives gatekept polls through their lifecycle: reminds non-voters while
/// quorum is missing and closes polls once quorum holds past the close delay.
pub struct LifecycleScheduler {
    polls: Arc<dyn PollStore>,
    ballots: Arc<dyn BallotStore>,
    directory: Option<Arc<dyn Directory>>,
    notifier: Arc<dyn NotificationSink>,
    policy: QuorumPolicy,
    announcements_channel: String,
    vote_host: String,
    call_timeout: StdDuration,
}

impl LifecycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        polls: Arc<dyn PollStore>,
        ballots: Arc<dyn BallotStore>,
        directory: Option<Arc<dyn Directory>>,
        notifier: Arc<dyn NotificationSink>,
        policy: QuorumPolicy,
        announcements_channel: String,
        vote_host: String,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            polls,
            ballots,
            directory,
            notifier,
            policy,
            announcements_channel,
            vote_host: vote_host.trim_end_matches('/').to_string(),
            call_timeout,
        }
    }

    /// Starts the daily pass: first at the next local midnight, then every
    /// 24 hours.
    pub fn spawn_daily(self: Arc<Self>) -> PeriodicTask {
        let first = until_next_midnight(Local::now());
        info!("First poll evaluation in {}s", first.as_secs());
        PeriodicTask::spawn("poll lifecycle", first, DAILY, move || {
            let scheduler = Arc::clone(&self);
            async move {
                let report = scheduler.run_pass(Utc::now()).await;
                info!(
                    "Poll evaluation finished: {} evaluated, {} reminders, {} closed, {} skipped",
                    report.evaluated,
                    report.reminders_sent,
                    report.closed.len(),
                    report.skipped
                );
            }
        })
    }

    /// One evaluation pass over every open gatekept poll. Failures are logged
    /// and only affect the poll or recipient they belong to.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();
        let Some(polls) = self
            .bounded("list open gatekept polls", self.polls.list_open_gatekept_polls())
            .await
        else {
            return report;
        };
        debug!("Evaluating {} open gatekept poll(s)", polls.len());

        let mut closed: Vec<Poll> = Vec::new();
        for poll in polls {
            report.evaluated += 1;

            let turnout = if self.policy.is_due(&poll, now) && !poll.allowed_voters.is_empty() {
                self.turnout(&poll).await
            } else {
                Turnout::default()
            };

            match self.policy.evaluate(&poll, &turnout, now) {
                Ok(Decision::Wait) => {}
                Ok(Decision::Remind { recipients }) => {
                    info!(
                        "Poll \"{}\" has {} of {} votes; reminding {} voter(s)",
                        poll.short_description,
                        turnout.voted.len(),
                        poll.allowed_voters.len(),
                        recipients.len()
                    );
                    report.reminders_sent += self.remind(&poll, &recipients).await;
                }
                Ok(Decision::Close) => {
                    let closing = self
                        .bounded(&format!("close poll {}", poll.id), self.polls.close_poll(&poll.id))
                        .await;
                    if closing.is_some() {
                        info!("Time reached, closed poll \"{}\"", poll.short_description);
                        report.closed.push(poll.id.clone());
                        closed.push(poll);
                    } else {
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    error!("Skipping poll {}: {}", poll.id, e);
                    report.skipped += 1;
                }
            }
        }

        if !closed.is_empty() {
            let text = compose_announcement(&closed, &self.vote_host);
            report.announced = self
                .bounded(
                    "announce closed polls",
                    self.notifier.send_broadcast(&self.announcements_channel, &text),
                )
                .await
                .is_some();
        }

        report
    }

    async fn turnout(&self, poll: &Poll) -> Turnout {
        let mut turnout = Turnout::default();
        for voter in &poll.allowed_voters {
            let voted = self
                .bounded(
                    &format!("check whether {} voted in poll {}", voter, poll.id),
                    self.ballots.has_voted(&poll.id, voter),
                )
                .await;
            match voted {
                Some(true) => turnout.voted.push(voter.clone()),
                Some(false) => turnout.not_voted.push(voter.clone()),
                None => {}
            }
        }
        turnout
    }

    /// Returns how many reminders went out.
    async fn remind(&self, poll: &Poll, recipients: &[String]) -> usize {
        let text = reminder_text(poll, &self.vote_host);
        let mut sent = 0;
        for voter in recipients {
            let Some(handle) = self.chat_handle(voter).await else {
                continue;
            };
            let delivered = self
                .bounded(
                    &format!("remind {} about poll {}", voter, poll.id),
                    self.notifier.send_direct(&handle, &text),
                )
                .await;
            if delivered.is_some() {
                sent += 1;
            }
        }
        sent
    }

    /// Without a directory, voter identifiers are used as chat handles.
    async fn chat_handle(&self, voter: &str) -> Option<String> {
        let Some(directory) = &self.directory else {
            return Some(voter.to_string());
        };
        let handle = self
            .bounded(&format!("look up chat handle for {voter}"), directory.chat_handle(voter))
            .await?;
        if handle.is_none() {
            warn!("{} has no chat handle; cannot send reminder", voter);
        }
        handle
    }

    async fn bounded<T, E, F>(&self, what: &str, call: F) -> Option<T>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!("Failed to {}: {}", what, e);
                None
            }
            Err(_) => {
                error!("Timed out after {:?} trying to {}", self.call_timeout, what);
                None
            }
        }
    }
}

pub fn poll_link(vote_host: &str, poll: &Poll) -> String {
    format!("{}/poll/{}", vote_host, poll.id)
}

pub fn results_link(vote_host: &str, poll: &Poll) -> String {
    format!("{}/results/{}", vote_host, poll.id)
}

pub fn reminder_text(poll: &Poll, vote_host: &str) -> String {
    format!(
        "Hello, you have not yet voted on \"{}\". We have not yet hit quorum and we need YOU \
         to complete your responsibility as a member of house and vote.\n{}\nThank you!",
        poll.short_description,
        poll_link(vote_host, poll)
    )
}

/// One message covering every poll closed in a pass.
pub fn compose_announcement(closed: &[Poll], vote_host: &str) -> String {
    let entry = |poll: &Poll| {
        if poll.hidden {
            "Results will be posted separately.".to_string()
        } else {
            format!("Check out the results at {}", results_link(vote_host, poll))
        }
    };

    match closed {
        [poll] => format!("The vote \"{}\" has closed. {}", poll.short_description, entry(poll)),
        polls => {
            let mut text = String::from("The following votes have closed:\n");
            for poll in polls {
                text.push_str(&format!("• \"{}\": {}\n", poll.short_description, entry(poll)));
            }
            text.trim_end().to_string()
        }
    }
}
