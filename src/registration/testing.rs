//! In-memory transactional store with failure injection, artificial delays and
//! counters for every terminal call, plus an object store that records writes.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::{
    repo::USERS_EMAIL_KEY,
    request::{DocumentRef, NewUser, ProjectRecord, ValidatedRegistration},
    tx::{
        ConstraintKind, FaultClass, Insert, StatementFailed, TransactionHandle,
        TransactionSource, TxError,
    },
};
use crate::storage::StorageClient;

type FaultRule = Box<dyn Fn(&Insert<'_>) -> Option<StatementFailed> + Send + Sync>;
type DelayRule = Box<dyn Fn(&Insert<'_>) -> Option<Duration> + Send + Sync>;

#[derive(Default)]
struct Tables {
    users: Vec<(Uuid, NewUser)>,
    skills: Vec<(Uuid, String)>,
    projects: Vec<(Uuid, ProjectRecord)>,
    documents: Vec<(Uuid, DocumentRef)>,
}

impl Tables {
    fn append(&mut self, other: Tables) {
        self.users.extend(other.users);
        self.skills.extend(other.skills);
        self.projects.extend(other.projects);
        self.documents.extend(other.documents);
    }
}

#[derive(Default)]
struct Rules {
    faults: Vec<FaultRule>,
    delays: Vec<DelayRule>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    commit_delay: Option<Duration>,
    rollback_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub dependent_issued: AtomicUsize,
    pub dependent_settled: AtomicUsize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub users: usize,
    pub skills: usize,
    pub projects: usize,
    pub documents: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    counters: Arc<Counters>,
    rules: Arc<Rules>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rules_mut(&mut self) -> &mut Rules {
        Arc::get_mut(&mut self.rules).expect("configure the store before sharing it")
    }

    pub fn fail_when(
        mut self,
        rule: impl Fn(&Insert<'_>) -> Option<StatementFailed> + Send + Sync + 'static,
    ) -> Self {
        self.rules_mut().faults.push(Box::new(rule));
        self
    }

    pub fn delay_when(
        mut self,
        rule: impl Fn(&Insert<'_>) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.rules_mut().delays.push(Box::new(rule));
        self
    }

    pub fn fail_begin(mut self) -> Self {
        self.rules_mut().fail_begin = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.rules_mut().fail_commit = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.rules_mut().fail_rollback = true;
        self
    }

    pub fn delay_commit(mut self, delay: Duration) -> Self {
        self.rules_mut().commit_delay = Some(delay);
        self
    }

    pub fn delay_rollback(mut self, delay: Duration) -> Self {
        self.rules_mut().rollback_delay = Some(delay);
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn terminal_actions(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst) + self.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub fn row_counts(&self) -> RowCounts {
        let t = self.tables.lock().unwrap();
        RowCounts {
            users: t.users.len(),
            skills: t.skills.len(),
            projects: t.projects.len(),
            documents: t.documents.len(),
        }
    }

    /// True when every committed dependent row points at `user_id`.
    pub fn owns_all_dependents(&self, user_id: Uuid) -> bool {
        let t = self.tables.lock().unwrap();
        t.skills.iter().all(|(u, _)| *u == user_id)
            && t.projects.iter().all(|(u, _)| *u == user_id)
            && t.documents.iter().all(|(u, _)| *u == user_id)
    }
}

#[async_trait]
impl TransactionSource for MemoryStore {
    type Handle = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, TxError> {
        if self.rules.fail_begin {
            return Err(TxError::TransactionStartFailed("too many connections".into()));
        }
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTx {
            tables: self.tables.clone(),
            counters: self.counters.clone(),
            rules: self.rules.clone(),
            staged: Mutex::new(Tables::default()),
        })
    }
}

pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    counters: Arc<Counters>,
    rules: Arc<Rules>,
    staged: Mutex<Tables>,
}

impl MemoryTx {
    fn apply(&self, stmt: Insert<'_>) -> Result<Uuid, StatementFailed> {
        if let Some(fault) = self.rules.faults.iter().find_map(|rule| rule(&stmt)) {
            return Err(fault);
        }

        let mut staged = self.staged.lock().unwrap();
        let id = Uuid::new_v4();
        match stmt {
            Insert::User(user) => {
                let committed = self.tables.lock().unwrap();
                let taken = committed
                    .users
                    .iter()
                    .chain(staged.users.iter())
                    .any(|(_, u)| u.email == user.email);
                if taken {
                    return Err(constraint(ConstraintKind::Unique, USERS_EMAIL_KEY));
                }
                drop(committed);
                staged.users.push((id, user.clone()));
            }
            Insert::Skill { user_id, name } => {
                check_owner(&staged, user_id)?;
                if name.is_empty() {
                    return Err(constraint(ConstraintKind::Check, "skills_skill_name_check"));
                }
                staged.skills.push((user_id, name.to_string()));
            }
            Insert::Project { user_id, project } => {
                check_owner(&staged, user_id)?;
                if project.name.is_empty() {
                    return Err(constraint(ConstraintKind::Check, "projects_project_name_check"));
                }
                staged.projects.push((user_id, project.clone()));
            }
            Insert::Document { user_id, document } => {
                check_owner(&staged, user_id)?;
                if document.stored_reference.is_empty() {
                    return Err(constraint(ConstraintKind::Check, "documents_file_path_check"));
                }
                staged.documents.push((user_id, document.clone()));
            }
        }
        Ok(id)
    }
}

#[async_trait]
impl TransactionHandle for MemoryTx {
    async fn query(&self, stmt: Insert<'_>) -> Result<Uuid, StatementFailed> {
        let dependent = !matches!(stmt, Insert::User(_));
        if dependent {
            self.counters.dependent_issued.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.rules.delays.iter().find_map(|rule| rule(&stmt)) {
            tokio::time::sleep(delay).await;
        }
        let result = self.apply(stmt);
        if dependent {
            self.counters.dependent_settled.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn commit(self) -> Result<(), TxError> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.rules.commit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.rules.fail_commit {
            return Err(TxError::CommitFailed("connection lost during commit".into()));
        }
        let staged = self.staged.into_inner().unwrap();
        self.tables.lock().unwrap().append(staged);
        Ok(())
    }

    async fn rollback(self) -> Result<(), TxError> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.rules.rollback_delay {
            tokio::time::sleep(delay).await;
        }
        if self.rules.fail_rollback {
            return Err(TxError::RollbackFailed("connection lost during rollback".into()));
        }
        Ok(())
    }
}

fn constraint(kind: ConstraintKind, name: &str) -> StatementFailed {
    StatementFailed::new(FaultClass::Constraint(kind), format!("violates constraint {name}"))
        .with_constraint(name)
}

fn check_owner(staged: &Tables, user_id: Uuid) -> Result<(), StatementFailed> {
    if staged.users.iter().any(|(id, _)| *id == user_id) {
        Ok(())
    } else {
        Err(constraint(ConstraintKind::ForeignKey, "user_id_fkey"))
    }
}

/// Builds a registration with the given skills plus `projects` projects and
/// `documents` documents.
pub fn registration(
    email: &str,
    skills: &[&str],
    projects: usize,
    documents: usize,
) -> ValidatedRegistration {
    ValidatedRegistration {
        user: NewUser {
            name: "Test Student".into(),
            email: email.into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            roll_number: "R-42".into(),
            department: Some("CSE".into()),
            year_of_study: Some("2".into()),
            phone_number: None,
            profile_picture: None,
        },
        skills: skills.iter().map(|s| s.to_string()).collect(),
        projects: (0..projects)
            .map(|i| ProjectRecord {
                name: format!("project-{i}"),
                description: "a project".into(),
                link: None,
            })
            .collect(),
        documents: (0..documents)
            .map(|i| DocumentRef {
                display_name: format!("doc-{i}.pdf"),
                stored_reference: format!("uploads/{i}.pdf"),
            })
            .collect(),
    }
}

/// Object store that keeps the keys it was asked to write and delete.
#[derive(Default)]
pub struct RecordingStorage {
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_on_put: Option<usize>,
}

impl RecordingStorage {
    /// Fails the put with this zero-based index.
    pub fn failing_on_put(index: usize) -> Self {
        Self {
            fail_on_put: Some(index),
            ..Self::default()
        }
    }

    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for RecordingStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let mut puts = self.puts.lock().unwrap();
        if self.fail_on_put == Some(puts.len()) {
            anyhow::bail!("bucket unavailable");
        }
        puts.push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn presign_get(&self, key: &str, _seconds: u64) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{key}"))
    }
}
