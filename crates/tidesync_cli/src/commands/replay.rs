//! Replay command implementation.
//!
//! A scenario declares models, optional seed rows and a list of steps. The
//! steps run in order against fresh in-memory storage through one outbox and
//! one merger:
//!
//! ```json
//! {
//!   "models": [{ "name": "Todo", "primaryKey": ["id"] }],
//!   "seed": { "Todo": [{ "id": "t1", "title": "milk", "_version": 1 }] },
//!   "steps": [
//!     { "enqueue": { "model": "Todo", "operation": "UPDATE", "record": { "id": "t1" } } },
//!     { "merge": { "model": "Todo", "record": { "id": "t1", "_version": 2 } } },
//!     "peek",
//!     "dequeue"
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tidesync_core::{
    ModelMerger, MutationEvent, MutationOperation, MutationOutbox, PendingMutationVersion,
    SyncConfig, SyncError, SyncResult,
};
use tidesync_storage::{
    InMemoryStorage, ModelDefinition, OpType, Predicate, Record, Storage, StorageError,
};
use tracing::{debug, info};

/// Errors raised while loading or replaying a scenario.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The scenario file could not be read.
    #[error("failed to read scenario {}: {source}", path.display())]
    Read {
        /// Scenario path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The scenario is not valid JSON or has the wrong shape.
    #[error("invalid scenario: {0}")]
    Scenario(#[source] serde_json::Error),

    /// A seed entry or step names a model the scenario does not declare.
    #[error("{context}: unknown model `{model}`")]
    UnknownModel {
        /// Where the name appeared.
        context: String,
        /// The undeclared name.
        model: String,
    },

    /// A step failed in the sync core.
    #[error("step {step} ({kind}) failed: {source}")]
    Step {
        /// One-based step number.
        step: usize,
        /// Step kind.
        kind: &'static str,
        /// Underlying failure.
        #[source]
        source: SyncError,
    },

    /// Seeding or reading back storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An outbox row could not be decoded for the report.
    #[error("corrupt {table} row: {source}")]
    CorruptRow {
        /// Table the row came from.
        table: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },
}

/// A replayable scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    /// Optional overrides of the sync configuration.
    #[serde(default)]
    pub config: ScenarioConfig,
    /// Models the scenario works with.
    pub models: Vec<ModelDefinition>,
    /// Rows written to local storage before the first step.
    #[serde(default)]
    pub seed: BTreeMap<String, Vec<Record>>,
    /// Steps to run, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Sync configuration overrides; unset fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Table holding queued mutation events.
    pub mutation_event_model: Option<String>,
    /// Table holding pending mutation versions.
    pub pending_version_model: Option<String>,
    /// Separator between composite key values.
    pub identifier_separator: Option<String>,
}

impl ScenarioConfig {
    fn to_sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        if let Some(name) = &self.mutation_event_model {
            config = config.with_mutation_event_model(name.as_str());
        }
        if let Some(name) = &self.pending_version_model {
            config = config.with_pending_version_model(name.as_str());
        }
        if let Some(separator) = &self.identifier_separator {
            config = config.with_identifier_separator(separator.as_str());
        }
        config
    }
}

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Queue a local mutation.
    Enqueue {
        /// Model name.
        model: String,
        /// Kind of change.
        operation: MutationOperation,
        /// Record snapshot.
        record: Record,
        /// Optional conditional-write guard.
        #[serde(default)]
        condition: Option<Predicate>,
    },
    /// Merge one remote record.
    Merge {
        /// Model name.
        model: String,
        /// Remote record.
        record: Record,
    },
    /// Bulk-merge a page of remote records.
    MergePage {
        /// Model name.
        model: String,
        /// Remote records, in page order.
        records: Vec<Record>,
    },
    /// Read the queue head and mark it in progress.
    Peek,
    /// Remove the queue head.
    Dequeue,
}

impl Step {
    /// Short name used in output.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Enqueue { .. } => "enqueue",
            Step::Merge { .. } => "merge",
            Step::MergePage { .. } => "mergePage",
            Step::Peek => "peek",
            Step::Dequeue => "dequeue",
        }
    }

    fn model(&self) -> Option<&str> {
        match self {
            Step::Enqueue { model, .. }
            | Step::Merge { model, .. }
            | Step::MergePage { model, .. } => Some(model),
            Step::Peek | Step::Dequeue => None,
        }
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StepOutcome {
    /// The mutation was queued or coalesced.
    #[serde(rename_all = "camelCase")]
    Queued {
        /// Model id of the mutation.
        model_id: String,
        /// Queue length afterwards.
        queue_length: usize,
    },
    /// The remote record was written.
    #[serde(rename_all = "camelCase")]
    Applied {
        /// Model id of the record.
        model_id: String,
        /// Storage operation performed.
        change: OpType,
    },
    /// The remote record was held back or stale.
    #[serde(rename_all = "camelCase")]
    Skipped {
        /// Model id of the record.
        model_id: String,
    },
    /// A page was bulk-written.
    PageWritten {
        /// Records in the page.
        received: usize,
        /// Records written after dedup.
        written: usize,
        /// Tombstones among the written records.
        deleted: usize,
    },
    /// The queue head, now in progress.
    Head {
        /// Head entry, if any.
        mutation: Option<MutationEvent>,
    },
    /// The removed queue head.
    Removed {
        /// Removed entry, if any.
        mutation: Option<MutationEvent>,
    },
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Queued {
                model_id,
                queue_length,
            } => write!(f, "{model_id} queued (queue length {queue_length})"),
            StepOutcome::Applied { model_id, change } => {
                write!(f, "{model_id} applied ({change})")
            }
            StepOutcome::Skipped { model_id } => write!(f, "{model_id} skipped"),
            StepOutcome::PageWritten {
                received,
                written,
                deleted,
            } => write!(f, "{written} of {received} records written, {deleted} deleted"),
            StepOutcome::Head { mutation } | StepOutcome::Removed { mutation } => match mutation {
                Some(m) => write!(f, "{}/{} {}", m.model, m.model_id, m.operation),
                None => write!(f, "queue empty"),
            },
        }
    }
}

/// One line of the step log.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// One-based step number.
    pub step: usize,
    /// Step kind.
    pub kind: &'static str,
    /// What happened.
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Result of a replay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Step log.
    pub steps: Vec<StepReport>,
    /// Queued mutations, head first.
    pub queue: Vec<MutationEvent>,
    /// Pending mutation versions.
    pub pending_versions: Vec<PendingMutationVersion>,
    /// Rows of every declared model.
    pub tables: BTreeMap<String, Vec<Record>>,
}

/// Runs the replay command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = load(path)?;
    let report = replay(&scenario)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Reads and parses a scenario file.
pub fn load(path: &Path) -> Result<Scenario, ReplayError> {
    let text = fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(ReplayError::Scenario)
}

/// Runs `scenario` against fresh storage.
pub fn replay(scenario: &Scenario) -> Result<Report, ReplayError> {
    let replayer = Replayer::new(scenario)?;
    replayer.seed(&scenario.seed)?;

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let number = index + 1;
        let outcome = replayer.apply(number, step)?;
        debug!(step = number, kind = step.kind(), %outcome, "step replayed");
        steps.push(StepReport {
            step: number,
            kind: step.kind(),
            outcome,
        });
    }

    info!(steps = steps.len(), "scenario replayed");
    replayer.report(steps)
}

struct Replayer<'a> {
    models: HashMap<&'a str, &'a ModelDefinition>,
    storage: Arc<InMemoryStorage>,
    outbox: Arc<MutationOutbox<InMemoryStorage>>,
    merger: ModelMerger<InMemoryStorage>,
    queue_model: ModelDefinition,
    version_model: ModelDefinition,
}

impl<'a> Replayer<'a> {
    fn new(scenario: &'a Scenario) -> Result<Self, ReplayError> {
        let models: HashMap<&str, &ModelDefinition> = scenario
            .models
            .iter()
            .map(|def| (def.name(), def))
            .collect();

        for (number, step) in scenario.steps.iter().enumerate() {
            if let Some(model) = step.model() {
                if !models.contains_key(model) {
                    return Err(ReplayError::UnknownModel {
                        context: format!("step {}", number + 1),
                        model: model.to_string(),
                    });
                }
            }
        }

        let config = scenario.config.to_sync_config();
        let storage = Arc::new(InMemoryStorage::new());
        let outbox = Arc::new(MutationOutbox::with_config(Arc::clone(&storage), config));
        let merger = ModelMerger::new(Arc::clone(&outbox));

        Ok(Self {
            models,
            queue_model: outbox.config().mutation_event_definition(),
            version_model: outbox.config().pending_version_definition(),
            storage,
            outbox,
            merger,
        })
    }

    fn model(
        &self,
        context: impl FnOnce() -> String,
        name: &str,
    ) -> Result<&'a ModelDefinition, ReplayError> {
        self.models
            .get(name)
            .copied()
            .ok_or_else(|| ReplayError::UnknownModel {
                context: context(),
                model: name.to_string(),
            })
    }

    fn seed(&self, seed: &BTreeMap<String, Vec<Record>>) -> Result<(), ReplayError> {
        for (name, records) in seed {
            let def = self.model(|| "seed".to_string(), name)?;
            for record in records {
                self.storage.save(def, record.clone(), None, None)?;
            }
            debug!(model = %name, rows = records.len(), "seeded");
        }
        Ok(())
    }

    fn apply(&self, number: usize, step: &Step) -> Result<StepOutcome, ReplayError> {
        let context = || format!("step {number}");
        let outcome = match step {
            Step::Enqueue {
                model,
                operation,
                record,
                condition,
            } => {
                let def = self.model(context, model)?;
                self.enqueue(def, record, *operation, condition.as_ref())
            }
            Step::Merge { model, record } => {
                let def = self.model(context, model)?;
                self.merge(def, record)
            }
            Step::MergePage { model, records } => {
                let def = self.model(context, model)?;
                self.merge_page(def, records)
            }
            Step::Peek => self
                .outbox
                .peek(self.storage.as_ref())
                .map(|mutation| StepOutcome::Head { mutation }),
            Step::Dequeue => self
                .outbox
                .dequeue(self.storage.as_ref())
                .map(|mutation| StepOutcome::Removed { mutation }),
        };

        outcome.map_err(|source| ReplayError::Step {
            step: number,
            kind: step.kind(),
            source,
        })
    }

    fn enqueue(
        &self,
        def: &ModelDefinition,
        record: &Record,
        operation: MutationOperation,
        condition: Option<&Predicate>,
    ) -> SyncResult<StepOutcome> {
        let mutation = self.outbox.mutation_for(def, record, operation, condition)?;
        let model_id = mutation.model_id.clone();
        self.outbox.enqueue(mutation)?;
        let queue_length = self.storage.query(&self.queue_model, None)?.len();
        Ok(StepOutcome::Queued {
            model_id,
            queue_length,
        })
    }

    fn merge(&self, def: &ModelDefinition, record: &Record) -> SyncResult<StepOutcome> {
        let model_id = self.outbox.model_id(def, record)?;
        let applied = self.merger.merge(self.storage.as_ref(), record.clone(), def)?;

        Ok(match applied {
            Some(change) => StepOutcome::Applied { model_id, change },
            None => StepOutcome::Skipped { model_id },
        })
    }

    fn merge_page(&self, def: &ModelDefinition, records: &[Record]) -> SyncResult<StepOutcome> {
        let written = self
            .merger
            .merge_page(self.storage.as_ref(), records.to_vec(), def)?;
        Ok(StepOutcome::PageWritten {
            received: records.len(),
            written: written.len(),
            deleted: written
                .iter()
                .filter(|(_, op)| *op == OpType::Delete)
                .count(),
        })
    }

    fn report(&self, steps: Vec<StepReport>) -> Result<Report, ReplayError> {
        let mut tables = BTreeMap::new();
        for (name, def) in &self.models {
            tables.insert(name.to_string(), self.storage.query(def, None)?);
        }

        Ok(Report {
            steps,
            queue: self.decode(&self.queue_model)?,
            pending_versions: self.decode(&self.version_model)?,
            tables,
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(
        &self,
        def: &ModelDefinition,
    ) -> Result<Vec<T>, ReplayError> {
        self.storage
            .query(def, None)?
            .into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row.into_fields())).map_err(|source| {
                    ReplayError::CorruptRow {
                        table: def.name().to_string(),
                        source,
                    }
                })
            })
            .collect()
    }
}

fn print_text_output(report: &Report) {
    println!("Steps ({} total)", report.steps.len());
    println!("================");
    for step in &report.steps {
        println!("[{:03}] {:10} {}", step.step, step.kind, step.outcome);
    }
    println!();

    println!("Queue ({} entries)", report.queue.len());
    println!("================");
    for mutation in &report.queue {
        print!(
            "{}/{} {:6} {}",
            mutation.model,
            mutation.model_id,
            mutation.operation.to_string(),
            mutation.data
        );
        if matches!(mutation.has_condition(), Ok(true)) {
            print!(" when {}", mutation.condition);
        }
        println!();
    }
    println!();

    println!("Pending versions ({} total)", report.pending_versions.len());
    println!("================");
    for pending in &report.pending_versions {
        println!("{} = {}", pending.id, pending.version);
    }

    for (name, rows) in &report.tables {
        println!();
        println!("{name} ({} rows)", rows.len());
        println!("================");
        for row in rows {
            println!("{}", Value::Object(row.fields().clone()));
        }
    }
}
