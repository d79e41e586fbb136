use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Long-running backend operations the dashboard can launch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Scan the procurement sources for new bids.
    DataIngestion,
    /// Recompute match scores for the bids already stored.
    ReEvaluation,
}

/// User-facing texts for one job kind.
#[derive(Debug, Clone, Copy)]
pub struct JobLabels {
    pub name: &'static str,
    pub starting: &'static str,
    pub started: &'static str,
    pub completed: &'static str,
    pub launch_failed: &'static str,
    pub poll_failed: &'static str,
    pub aborted: &'static str,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::DataIngestion, JobKind::ReEvaluation];

    pub fn labels(self) -> &'static JobLabels {
        match self {
            JobKind::DataIngestion => &JobLabels {
                name: "Busca de novas licitações",
                starting: "Iniciando busca de novas licitações...",
                started: "Busca iniciada!",
                completed: "Busca de novas licitações concluída!",
                launch_failed: "Erro ao iniciar busca de licitações",
                poll_failed: "Erro ao verificar status da busca",
                aborted: "Busca de licitações interrompida pelo usuário",
            },
            JobKind::ReEvaluation => &JobLabels {
                name: "Reavaliação de matches",
                starting: "Iniciando reavaliação de matches...",
                started: "Reavaliação iniciada!",
                completed: "Reavaliação de matches concluída!",
                launch_failed: "Erro ao iniciar reavaliação de matches",
                poll_failed: "Erro ao verificar status da reavaliação",
                aborted: "Reavaliação de matches interrompida pelo usuário",
            },
        }
    }

    /// Default `(start, status)` paths relative to the API base URL.
    pub fn default_paths(self) -> (&'static str, &'static str) {
        match self {
            JobKind::DataIngestion => ("search-new-bids", "status/daily-bids"),
            JobKind::ReEvaluation => ("reevaluate-bids", "status/reevaluate"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::DataIngestion => "data-ingestion",
            JobKind::ReEvaluation => "re-evaluation",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// `Starting` or `Running`: the job still needs observing.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Starting | JobState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub kind: JobKind,
    pub state: JobState,
    pub message: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Last completed run as reported by the backend status endpoint.
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(skip)]
    pub(crate) run_id: u64,
}

impl JobRecord {
    pub fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            state: JobState::Idle,
            message: String::new(),
            started_at: None,
            last_run: None,
            run_id: 0,
        }
    }
}

pub type JobSnapshot = BTreeMap<JobKind, JobRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Item counts returned by a full data refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub collections: Vec<(String, usize)>,
}

impl RefreshSummary {
    pub fn to_message(&self) -> String {
        if self.collections.is_empty() {
            return "Dados recarregados".to_string();
        }
        let parts: Vec<String> = self
            .collections
            .iter()
            .map(|(name, n)| format!("{name}: {n}"))
            .collect();
        format!("Dados recarregados ({})", parts.join(", "))
    }
}

/// Events emitted by the monitor and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Jobs(JobSnapshot),
    /// `None` when the visible notification was hidden.
    Notification(Option<Notification>),
    Polling(bool),
    Reloaded(RefreshSummary),
    /// The startup status sync has been applied.
    Synced,
}
