use gantry_types::{StepRunResult, StepRunStatus, WorkflowRun, WorkflowRunStatus};

/// Mirrors the teacher's mission-state reducer: execution never mutates a
/// `WorkflowRun` directly, it folds an event into a fresh copy and returns
/// any side-effect commands the caller should perform.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StepStarted { step_id: String },
    StepFinished { step_id: String, result: StepRunResult },
    StepsSkipped { step_ids: Vec<String> },
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum WorkflowCommand {
    Notify { message: String },
}

pub struct DefaultWorkflowReducer;

impl DefaultWorkflowReducer {
    pub fn reduce(run: &WorkflowRun, event: WorkflowEvent) -> (WorkflowRun, Vec<WorkflowCommand>) {
        let mut next = run.clone();
        let mut commands = Vec::new();

        match event {
            WorkflowEvent::StepStarted { step_id } => {
                if let Some(result) = next.step_results.get_mut(&step_id) {
                    result.status = StepRunStatus::Running;
                }
            }
            WorkflowEvent::StepFinished { step_id, result } => {
                next.total_cost_usd += result.cost_usd;
                next.step_results.insert(step_id, result);
            }
            WorkflowEvent::StepsSkipped { step_ids } => {
                for id in step_ids {
                    let step_id = id.clone();
                    next.step_results
                        .entry(id)
                        .and_modify(|r| r.status = StepRunStatus::Skipped)
                        .or_insert_with(|| {
                            let mut r = StepRunResult::pending(step_id);
                            r.status = StepRunStatus::Skipped;
                            r
                        });
                }
            }
            WorkflowEvent::Cancelled => {
                next.status = WorkflowRunStatus::Cancelled;
                for result in next.step_results.values_mut() {
                    if !result.status.is_terminal() {
                        result.status = StepRunStatus::Skipped;
                    }
                }
                commands.push(WorkflowCommand::Notify {
                    message: format!("workflow run {} was cancelled", next.id),
                });
            }
        }

        (next, commands)
    }
}
