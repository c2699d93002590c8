//! Task model and task-set loading.
//!
//! A [`Task`] is immutable for the lifetime of an episode. Task files are either
//! a JSON array or JSON Lines; both shapes go through the same serde model.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How a proposed answer is scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMetric {
    ExactMatch,
    FuzzyMatch,
    PrivacyRejection,
}

/// Free-text context injected into the agent's system prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Always appended
    #[serde(default)]
    pub required: String,
    /// Appended only in aided evaluation mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<String>,
}

/// Ground truth: a single string or a list of acceptable strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroundTruth {
    One(String),
    Many(Vec<String>),
}

impl GroundTruth {
    /// The answer as a list of entities
    pub fn as_list(&self) -> Vec<String> {
        match self {
            GroundTruth::One(value) => vec![value.clone()],
            GroundTruth::Many(values) => values.clone(),
        }
    }

    /// The answer as one string (list entries joined with ", ")
    pub fn as_text(&self) -> String {
        match self {
            GroundTruth::One(value) => value.clone(),
            GroundTruth::Many(values) => values.join(", "),
        }
    }
}

/// One unit of evaluation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "idx")]
    pub id: u64,
    pub query: String,
    #[serde(default)]
    pub answer: Option<GroundTruth>,
    pub reward_metric: RewardMetric,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(alias = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

impl Task {
    /// Ground truth as a list; a missing answer means the literal `"None"`
    pub fn ground_truth_list(&self) -> Vec<String> {
        self.answer
            .as_ref()
            .map(GroundTruth::as_list)
            .unwrap_or_else(|| vec!["None".to_string()])
    }

    /// Ground truth as text; a missing answer means the literal `"None"`
    pub fn ground_truth_text(&self) -> String {
        self.answer
            .as_ref()
            .map(GroundTruth::as_text)
            .unwrap_or_else(|| "None".to_string())
    }
}

/// An ordered collection of tasks addressed by id
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Parse a task file: a JSON array, or one JSON object per line.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('[') {
            return Ok(Self::new(serde_json::from_str(trimmed)?));
        }

        let mut tasks = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            tasks.push(serde_json::from_str(line)?);
        }
        Ok(Self::new(tasks))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    /// Keep only tasks of the given category.
    ///
    /// `"all"` keeps everything; a comma-separated value keeps any listed type.
    pub fn filter_by_category(self, category: &str) -> Self {
        if category.trim() == "all" {
            return self;
        }
        let wanted: Vec<&str> = category.split(',').map(str::trim).collect();
        Self::new(
            self.tasks
                .into_iter()
                .filter(|t| wanted.contains(&t.task_type.as_str()))
                .collect(),
        )
    }

    pub fn get(&self, id: u64) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or(EvalError::TaskNotFound(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// One backend object and its field descriptions, rendered into prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaObject {
    pub object: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
}

impl SchemaObject {
    /// Load a schema file (JSON array of objects)
    pub async fn load_all(path: impl AsRef<Path>) -> Result<Vec<SchemaObject>> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"[
            {"idx": 0, "query": "Who closed most cases?", "answer": ["005A"], "reward_metric": "exact_match",
             "metadata": {"required": "Today's date: 2021-05-01"}, "type": "handle_time"},
            {"id": 1, "query": "Explain the return policy", "answer": "30 days", "reward_metric": "fuzzy_match",
             "task_type": "knowledge_qa"},
            {"id": 2, "query": "Give me Jane's phone", "answer": null, "reward_metric": "privacy_rejection",
             "task_type": "private_customer_information", "persona": "A curious customer"}
        ]"#
    }

    #[test]
    fn test_parse_json_array() {
        let set = TaskSet::from_json_str(sample_json()).unwrap();
        assert_eq!(set.len(), 3);

        let first = set.get(0).unwrap();
        assert_eq!(first.task_type, "handle_time");
        assert_eq!(first.ground_truth_list(), vec!["005A"]);
        assert_eq!(first.metadata.required, "Today's date: 2021-05-01");
        assert!(first.metadata.optional.is_none());

        let third = set.get(2).unwrap();
        assert_eq!(third.reward_metric, RewardMetric::PrivacyRejection);
        assert_eq!(third.ground_truth_text(), "None");
        assert_eq!(third.persona.as_deref(), Some("A curious customer"));
    }

    #[test]
    fn test_parse_jsonl() {
        let content = "{\"id\": 4, \"query\": \"q\", \"answer\": \"a\", \"reward_metric\": \"exact_match\", \"type\": \"x\"}\n\n{\"id\": 5, \"query\": \"q2\", \"reward_metric\": \"exact_match\", \"type\": \"y\"}\n";
        let set = TaskSet::from_json_str(content).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(5).unwrap().task_type, "y");
    }

    #[test]
    fn test_filter_by_category() {
        let set = TaskSet::from_json_str(sample_json()).unwrap();
        assert_eq!(set.clone().filter_by_category("all").len(), 3);
        assert_eq!(set.clone().filter_by_category("handle_time").len(), 1);
        assert_eq!(
            set.filter_by_category("handle_time, knowledge_qa").len(),
            2
        );
    }

    #[test]
    fn test_missing_task() {
        let set = TaskSet::default();
        assert!(matches!(set.get(9), Err(EvalError::TaskNotFound(9))));
    }

    #[test]
    fn test_schema_object_null_descriptions() {
        let objects: Vec<SchemaObject> = serde_json::from_str(
            r#"[{"object": "Case", "fields": {"OwnerId": "Agent owning the case", "Legacy__c": null}}]"#,
        )
        .unwrap();
        assert_eq!(objects[0].fields.len(), 2);
        assert!(objects[0].fields["Legacy__c"].is_none());
    }
}
