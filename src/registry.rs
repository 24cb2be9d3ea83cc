//! Task definition registry
//!
//! Holds the ordered, immutable list of capture tasks a session walks through.

use crate::error::ScreeningError;
use crate::types::{Modality, TaskDescriptor};

/// Passage read aloud during the reading task
pub const READING_PASSAGE: &str = "Managing daily activities while maintaining a healthy \
    lifestyle can be challenging. Sometimes we face unexpected obstacles that test our \
    resilience and determination. It's important to remember that small consistent changes \
    lead to significant improvements. Taking care of our physical and mental health requires \
    dedication and self-compassion. Every step forward, no matter how small, is progress \
    worth celebrating.";

/// Ordered list of task descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRegistry {
    tasks: Vec<TaskDescriptor>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
        }
    }
}

impl TaskRegistry {
    /// Build a registry, rejecting empty or malformed task lists
    pub fn new(tasks: Vec<TaskDescriptor>) -> Result<Self, ScreeningError> {
        if tasks.is_empty() {
            return Err(ScreeningError::InvalidConfig(
                "task list must not be empty".to_string(),
            ));
        }

        for (index, task) in tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(ScreeningError::InvalidConfig(format!(
                    "task {index} has an empty name"
                )));
            }
            if task.duration_seconds == 0 {
                return Err(ScreeningError::InvalidConfig(format!(
                    "task '{}' must have a positive duration",
                    task.name
                )));
            }
            if task.baseline_key.trim().is_empty() {
                return Err(ScreeningError::InvalidConfig(format!(
                    "task '{}' has an empty baseline key",
                    task.name
                )));
            }
        }

        Ok(Self { tasks })
    }

    pub fn get(&self, index: usize) -> Option<&TaskDescriptor> {
        self.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter()
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Sum of all task durations
    pub fn total_duration_seconds(&self) -> u64 {
        self.tasks.iter().map(|t| u64::from(t.duration_seconds)).sum()
    }
}

/// The built-in three task sequence
pub fn default_tasks() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor {
            name: "reading".to_string(),
            modality: Modality::Voice,
            duration_seconds: 10,
            instructions: format!(
                "Please read the following text clearly and at a normal pace: \"{READING_PASSAGE}\""
            ),
            baseline_key: "reading".to_string(),
        },
        TaskDescriptor {
            name: "vowel_with_motion".to_string(),
            modality: Modality::VoiceWithMotion,
            duration_seconds: 10,
            instructions: "Say a steady \"aaah\" while slowly turning your head left and right."
                .to_string(),
            baseline_key: "vowel_with_motion".to_string(),
        },
        TaskDescriptor {
            name: "breath_hold".to_string(),
            modality: Modality::BreathHold,
            duration_seconds: 15,
            instructions: "Take a deep breath and hold it with your mouth closed \
                           for as long as is comfortable."
                .to_string(),
            baseline_key: "breath_hold".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = TaskRegistry::default();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(0).unwrap().modality, Modality::Voice);
        assert_eq!(registry.get(1).unwrap().modality, Modality::VoiceWithMotion);
        assert_eq!(registry.get(2).unwrap().modality, Modality::BreathHold);
        assert_eq!(registry.total_duration_seconds(), 35);
        assert!(registry.get(3).is_none());
    }

    #[test]
    fn test_rejects_empty_registry() {
        assert!(matches!(
            TaskRegistry::new(Vec::new()),
            Err(ScreeningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_duration() {
        let mut tasks = default_tasks();
        tasks[1].duration_seconds = 0;

        let err = TaskRegistry::new(tasks).unwrap_err();
        assert!(err.to_string().contains("vowel_with_motion"));
    }
}
