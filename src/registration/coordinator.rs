//! Fan-out insert coordinator.
//!
//! One run owns one transaction. The user row is inserted first; its id is then
//! fanned out to every skill, project and document insert, which are driven
//! concurrently. A single aggregator loop owns the [`FanOutTally`] and therefore
//! the commit/rollback decision: the first failure decides `Rollback`, the last
//! success decides `Commit`, and anything that settles afterwards is ignored.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    error::{InfraStage, RegistrationError},
    request::ValidatedRegistration,
    tx::{DependentKind, Insert, StatementFailed, TransactionHandle, TransactionSource},
};
use crate::config::RegistrationConfig;

/// Terminal result of a registration run. Rows exist iff `Committed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed(Uuid),
    RolledBack(RegistrationError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Uuid, RegistrationError> {
        match self {
            Self::Committed(id) => Ok(id),
            Self::RolledBack(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Commit,
    Rollback(RegistrationError),
}

/// Result of one dependent insert as seen by the aggregator.
#[derive(Debug)]
pub struct Settled {
    pub kind: DependentKind,
    pub index: usize,
    pub result: Result<Uuid, StatementFailed>,
}

/// Completion counter plus single-fire decision flag.
///
/// `record` yields a verdict at most once per tally, whatever order results
/// arrive in.
#[derive(Debug)]
pub struct FanOutTally {
    total: usize,
    completed: usize,
    fired: bool,
    ignored: usize,
}

impl FanOutTally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            fired: false,
            ignored: 0,
        }
    }

    pub fn record(&mut self, settled: Settled) -> Option<Verdict> {
        if self.fired {
            self.ignored += 1;
            return None;
        }
        match settled.result {
            Err(err) => {
                self.fired = true;
                Some(Verdict::Rollback(RegistrationError::dependent(
                    settled.kind,
                    settled.index,
                    err,
                )))
            }
            Ok(_) => {
                self.completed += 1;
                if self.completed == self.total {
                    self.fired = true;
                    Some(Verdict::Commit)
                } else {
                    None
                }
            }
        }
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }
}

#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    timeout: Duration,
    terminal_grace: Duration,
    max_in_flight: usize,
}

impl FanOutCoordinator {
    pub fn new(cfg: &RegistrationConfig) -> Self {
        Self {
            timeout: cfg.timeout,
            terminal_grace: cfg.terminal_grace,
            max_in_flight: cfg.max_in_flight.max(1),
        }
    }

    /// Opens a transaction from `source` and runs the registration in it.
    pub async fn register<S: TransactionSource>(
        &self,
        source: &S,
        req: &ValidatedRegistration,
    ) -> Outcome {
        let deadline = Instant::now() + self.timeout;
        let begun = timeout_at(deadline, source.begin()).await;
        match begun {
            Ok(Ok(tx)) => self.run_until(tx, req, deadline).await,
            Ok(Err(err)) => {
                error!(error = %err, "could not begin registration transaction");
                Outcome::RolledBack(err.into())
            }
            Err(_) => {
                error!(budget = ?self.timeout, "timed out waiting for a transaction");
                Outcome::RolledBack(self.timed_out())
            }
        }
    }

    #[instrument(skip_all, fields(dependents = req.dependent_count()))]
    async fn run_until<H: TransactionHandle>(
        &self,
        tx: H,
        req: &ValidatedRegistration,
        deadline: Instant,
    ) -> Outcome {
        let primary = timeout_at(deadline, tx.query(Insert::User(&req.user))).await;
        let user_id = match primary {
            Ok(Ok(id)) => id,
            Ok(Err(err)) => {
                warn!(error = %err, "user insert failed");
                return self.roll_back(tx, RegistrationError::primary(err)).await;
            }
            Err(_) => return self.roll_back(tx, self.timed_out()).await,
        };
        debug!(%user_id, "user row inserted");

        if req.dependent_count() == 0 {
            return self.commit(tx, user_id).await;
        }

        let verdict = self.fan_out(&tx, user_id, req, deadline).await;
        match verdict {
            Verdict::Commit => self.commit(tx, user_id).await,
            Verdict::Rollback(err) => self.roll_back(tx, err).await,
        }
    }

    async fn fan_out<H: TransactionHandle>(
        &self,
        tx: &H,
        user_id: Uuid,
        req: &ValidatedRegistration,
        deadline: Instant,
    ) -> Verdict {
        let inserts = dependent_inserts(user_id, req);
        let mut tally = FanOutTally::new(inserts.len());
        let mut pending = inserts.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut verdict = None;

        loop {
            // Nothing new is issued once the decision has fired.
            if !tally.fired() {
                while in_flight.len() < self.max_in_flight {
                    let Some((kind, index, stmt)) = pending.next() else {
                        break;
                    };
                    in_flight.push(async move {
                        Settled {
                            kind,
                            index,
                            result: tx.query(stmt).await,
                        }
                    });
                }
            }

            let next = timeout_at(deadline, in_flight.next()).await;
            match next {
                Ok(Some(settled)) => {
                    if let Some(decided) = tally.record(settled) {
                        if let Verdict::Rollback(err) = &decided {
                            warn!(error = %err, in_flight = in_flight.len(), "dependent insert failed");
                        }
                        verdict = Some(decided);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        in_flight = in_flight.len(),
                        completed = tally.completed(),
                        "time budget exhausted; abandoning in-flight inserts"
                    );
                    return verdict.unwrap_or_else(|| Verdict::Rollback(self.timed_out()));
                }
            }
        }

        if tally.ignored() > 0 {
            debug!(ignored = tally.ignored(), "discarded results settled after the decision");
        }

        verdict.unwrap_or_else(|| {
            error!(completed = tally.completed(), "fan-out drained without a decision");
            Verdict::Rollback(RegistrationError::Infrastructure {
                stage: InfraStage::FanOut,
                detail: format!("{} dependent inserts settled without a decision", tally.completed()),
            })
        })
    }

    // Terminal calls get `terminal_grace` on top of the run's deadline. A call
    // that overruns it is dropped together with the handle it consumed.
    async fn commit<H: TransactionHandle>(&self, tx: H, user_id: Uuid) -> Outcome {
        match timeout(self.terminal_grace, tx.commit()).await {
            Ok(Ok(())) => {
                info!(%user_id, "registration committed");
                Outcome::Committed(user_id)
            }
            Ok(Err(err)) => {
                error!(error = %err, %user_id, "registration commit failed");
                Outcome::RolledBack(err.into())
            }
            Err(_) => {
                error!(grace = ?self.terminal_grace, %user_id, "commit did not finish; handle abandoned");
                Outcome::RolledBack(RegistrationError::Infrastructure {
                    stage: InfraStage::Commit,
                    detail: format!("commit did not finish within {:?}", self.terminal_grace),
                })
            }
        }
    }

    async fn roll_back<H: TransactionHandle>(&self, tx: H, cause: RegistrationError) -> Outcome {
        match timeout(self.terminal_grace, tx.rollback()).await {
            Ok(Ok(())) => debug!(cause = %cause, "registration rolled back"),
            // The original failure is what the caller needs to see.
            Ok(Err(err)) => error!(error = %err, cause = %cause, "rollback failed"),
            Err(_) => error!(
                grace = ?self.terminal_grace,
                cause = %cause,
                "rollback did not finish; handle abandoned"
            ),
        }
        Outcome::RolledBack(cause)
    }

    fn timed_out(&self) -> RegistrationError {
        RegistrationError::TimedOut {
            budget: self.timeout,
        }
    }
}

fn dependent_inserts(
    user_id: Uuid,
    req: &ValidatedRegistration,
) -> Vec<(DependentKind, usize, Insert<'_>)> {
    let skills = req.skills.iter().enumerate().map(|(i, name)| {
        (DependentKind::Skill, i, Insert::Skill { user_id, name: name.as_str() })
    });
    let projects = req
        .projects
        .iter()
        .enumerate()
        .map(|(i, project)| (DependentKind::Project, i, Insert::Project { user_id, project }));
    let documents = req
        .documents
        .iter()
        .enumerate()
        .map(|(i, document)| (DependentKind::Document, i, Insert::Document { user_id, document }));
    skills.chain(projects).chain(documents).collect()
}
