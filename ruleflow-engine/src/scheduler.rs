use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::task::RunRequest;

type ArcQueues = Arc<RwLock<HashMap<String, VecDeque<RunRequest>>>>;
type ArcRotation = Arc<RwLock<VecDeque<String>>>;

/// Scheduler that distributes runs fairly across starting rules: each
/// starting rule keeps its own FIFO queue and the rules rotate
/// round-robin, so one deep graph cannot starve the others.
#[derive(Default, Clone)]
pub struct RunScheduler {
    queues: ArcQueues,
    rotation: ArcRotation,
}

impl RunScheduler {
    pub fn new() -> Self {
        Self {
            queues: ArcQueues::default(),
            rotation: ArcRotation::default(),
        }
    }

    pub fn enqueue(&self, request: RunRequest) {
        let start_rule = request.start_rule.clone();
        {
            let mut queues = self.queues.write();
            queues
                .entry(start_rule.clone())
                .or_insert_with(VecDeque::new)
                .push_back(request);
        }

        let mut rotation = self.rotation.write();
        if !rotation.iter().any(|rule| rule == &start_rule) {
            rotation.push_back(start_rule);
        }
    }

    /// Returns the next run following the round-robin rotation.
    pub fn next_run(&self) -> Option<RunRequest> {
        let mut rotation = self.rotation.write();
        let mut queues = self.queues.write();

        let len = rotation.len();
        for _ in 0..len {
            if let Some(start_rule) = rotation.pop_front() {
                let mut remove_rule = false;
                let maybe_request = queues.get_mut(&start_rule).and_then(|queue| {
                    let request = queue.pop_front();
                    if queue.is_empty() {
                        remove_rule = true;
                    }
                    request
                });

                if remove_rule {
                    queues.remove(&start_rule);
                } else {
                    rotation.push_back(start_rule.clone());
                }

                if let Some(request) = maybe_request {
                    return Some(request);
                }
            }
        }

        None
    }

    pub fn pending(&self) -> usize {
        self.queues.read().values().map(|queue| queue.len()).sum()
    }

    pub fn pending_for_rule(&self, start_rule: &str) -> usize {
        self.queues
            .read()
            .get(start_rule)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn start_rules(&self) -> Vec<String> {
        self.rotation.read().iter().cloned().collect()
    }
}
