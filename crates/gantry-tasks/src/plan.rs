//! Execution plan: groups a task set into waves for dry runs

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::json;
use tracing::{info, instrument};

use crate::task::{Task, TaskKey};

/// Errors during plan construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Cyclic dependency detected
    #[error("Cyclic dependency detected among tasks: {0}")]
    CyclicDependency(String),

    /// A task depends on a key outside the plan
    #[error("Task '{task}' depends on '{dependency}', which is not part of the plan")]
    MissingDependency { task: String, dependency: String },
}

/// Tasks grouped into waves; every task's dependencies lie in earlier waves
#[derive(Debug, Clone)]
pub struct TaskPlan {
    tasks: HashMap<TaskKey, Task>,
    waves: Vec<Vec<TaskKey>>,
    sorted_order: Vec<TaskKey>,
}

impl TaskPlan {
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn new(tasks: &[Task]) -> Result<Self, PlanError> {
        let mut nodes: HashMap<TaskKey, Task> = HashMap::new();
        let mut order: Vec<TaskKey> = Vec::new();
        for task in tasks {
            if !nodes.contains_key(&task.key) {
                order.push(task.key.clone());
            }
            let entry = nodes.entry(task.key.clone()).or_insert_with(|| task.clone());
            entry.force |= task.force;
        }

        for task in nodes.values() {
            if let Some(dep) = task.dependencies.iter().find(|d| !nodes.contains_key(*d)) {
                return Err(PlanError::MissingDependency {
                    task: task.key.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }

        let sorted_order = Self::topological_sort(&nodes, &order)?;
        let waves = Self::compute_waves(&nodes, &sorted_order);

        info!(
            task_count = nodes.len(),
            wave_count = waves.len(),
            "execution plan built"
        );

        Ok(Self {
            tasks: nodes,
            waves,
            sorted_order,
        })
    }

    /// Topological sort using Kahn's algorithm; ties keep input order
    fn topological_sort(
        nodes: &HashMap<TaskKey, Task>,
        order: &[TaskKey],
    ) -> Result<Vec<TaskKey>, PlanError> {
        let mut in_degree: HashMap<&TaskKey, usize> = HashMap::new();
        let mut dependents: HashMap<&TaskKey, Vec<&TaskKey>> = HashMap::new();
        let mut queue: VecDeque<&TaskKey> = VecDeque::new();
        let mut sorted: Vec<TaskKey> = Vec::with_capacity(nodes.len());

        for key in order {
            let task = &nodes[key];
            let deps: HashSet<&TaskKey> = task.dependencies.iter().collect();
            in_degree.insert(key, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(key);
            }
            if task.dependencies.is_empty() {
                queue.push_back(key);
            }
        }

        while let Some(key) = queue.pop_front() {
            sorted.push(key.clone());
            for dependent in dependents.get(key).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let in_sorted: HashSet<&TaskKey> = sorted.iter().collect();
            let cyclic: Vec<String> = order
                .iter()
                .filter(|key| !in_sorted.contains(key))
                .map(ToString::to_string)
                .collect();
            return Err(PlanError::CyclicDependency(cyclic.join(", ")));
        }

        Ok(sorted)
    }

    /// Wave of a task = 1 + the highest wave among its dependencies
    fn compute_waves(nodes: &HashMap<TaskKey, Task>, sorted: &[TaskKey]) -> Vec<Vec<TaskKey>> {
        let mut wave_map: HashMap<&TaskKey, usize> = HashMap::new();

        for key in sorted {
            let wave = nodes[key]
                .dependencies
                .iter()
                .filter_map(|dep| wave_map.get(dep))
                .max()
                .map(|w| w + 1)
                .unwrap_or(0);
            wave_map.insert(key, wave);
        }

        let wave_count = wave_map.values().max().map_or(0, |w| w + 1);
        let mut waves: Vec<Vec<TaskKey>> = vec![Vec::new(); wave_count];
        for key in sorted {
            if let Some(&wave) = wave_map.get(key) {
                waves[wave].push(key.clone());
            }
        }
        waves
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn waves(&self) -> &[Vec<TaskKey>] {
        &self.waves
    }

    pub fn sorted(&self) -> &[TaskKey] {
        &self.sorted_order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Human-readable summary of the plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for key in wave {
                let Some(task) = self.tasks.get(key) else {
                    continue;
                };
                let force = if task.force { " [force]" } else { "" };
                let deps: Vec<String> = task.dependencies.iter().map(ToString::to_string).collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {}{} -> {}\n", key, force, task.action.describe()));
                } else {
                    plan.push_str(&format!(
                        "  {}{} -> {} (after: {})\n",
                        key,
                        force,
                        task.action.describe(),
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }

    /// JSON form of the plan
    pub fn to_json(&self) -> serde_json::Value {
        let waves: Vec<serde_json::Value> = self
            .waves
            .iter()
            .map(|wave| {
                let tasks: Vec<serde_json::Value> = wave
                    .iter()
                    .filter_map(|key| self.tasks.get(key))
                    .map(|task| {
                        json!({
                            "task": task.key.to_string(),
                            "kind": task.key.kind,
                            "name": task.key.name,
                            "version": task.key.version,
                            "force": task.force,
                            "command": task.action.command(),
                            "dependencies": task
                                .dependencies
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                serde_json::Value::Array(tasks)
            })
            .collect();

        json!({ "tasks": self.len(), "waves": waves })
    }
}
