use std::{collections::HashMap, ops::Range, sync::Arc};

use caretask_domain::{Event, TaskVersion, ID};
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    repos::{IOutcomeStore, ITaskStore},
};

/// Assembles `Event`s by merge-joining task versions against their
/// outcomes, the way `expand_all_events_and_remove_exceptions` merges
/// calendar events against their exception instances.
pub struct EventAssembler {
    tasks: Arc<dyn ITaskStore>,
    outcomes: Arc<dyn IOutcomeStore>,
}

impl EventAssembler {
    pub fn new(tasks: Arc<dyn ITaskStore>, outcomes: Arc<dyn IOutcomeStore>) -> Self {
        Self { tasks, outcomes }
    }

    /// Identifiers of everything `query_events` would touch for `range`,
    /// cheap enough to poll as a change-detection anchor.
    pub async fn query_events_anchor(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ID>> {
        let versions = self.tasks.query_tasks(range.clone()).await?;
        let version_ids: Vec<ID> = versions.iter().map(|v| v.version_id.clone()).collect();
        let outcomes = self.outcomes.query_outcomes(&version_ids, range).await?;

        let mut ids = version_ids;
        ids.extend(outcomes.into_iter().map(|o| o.id));
        Ok(ids)
    }

    /// Events in `range`, sorted by `occurrence.start` ascending.
    pub async fn query_events(&self, range: Range<DateTime<Utc>>) -> Result<Vec<Event>> {
        let versions = self.tasks.query_tasks(range.clone()).await?;
        if versions.is_empty() {
            return Ok(Vec::new());
        }

        let version_ids: Vec<ID> = versions.iter().map(|v| v.version_id.clone()).collect();
        let outcomes = self.outcomes.query_outcomes(&version_ids, range.clone()).await?;

        let mut outcomes_by_version_and_start = HashMap::new();
        for outcome in outcomes {
            outcomes_by_version_and_start.insert((outcome.task_version_id.clone(), outcome.occurrence_start), outcome);
        }

        let effective_from_by_version: HashMap<ID, DateTime<Utc>> =
            versions.iter().map(|v| (v.version_id.clone(), v.effective_from)).collect();

        let mut events = Vec::new();
        for version in &versions {
            let lower_bound = if version.previous_version.is_some() { version.effective_from.max(range.start) } else { range.start };
            let upper_bound = version
                .next_version
                .as_ref()
                .and_then(|next_id| effective_from_by_version.get(next_id))
                .copied()
                .unwrap_or(range.end)
                .min(range.end);

            if lower_bound >= upper_bound {
                continue;
            }

            let occurrences = version.schedule.occurrences(lower_bound, upper_bound)?;
            for occurrence in occurrences {
                let outcome = outcomes_by_version_and_start.get(&(version.version_id.clone(), occurrence.start)).cloned();
                events.push(Event::new(version.clone(), occurrence, outcome));
            }
        }

        events.sort_by_key(|e| e.occurrence.start);
        Ok(events)
    }
}
