use std::collections::{HashMap, HashSet};

use gantry_types::{StepKind, Workflow, WorkflowValidationError};

/// Flattens a workflow's top-level steps (not descending into `parallel`
/// children, which are validated separately since they may not declare
/// `dependsOn`) into an id-keyed map, checking for duplicate ids.
fn index_steps(workflow: &Workflow) -> Result<HashMap<&str, &gantry_types::Step>, WorkflowValidationError> {
    let mut map = HashMap::new();
    for step in &workflow.steps {
        if map.insert(step.id.as_str(), step).is_some() {
            return Err(WorkflowValidationError::DuplicateStepId { id: step.id.clone() });
        }
    }
    Ok(map)
}

/// Runs every check in §4.G's "Validation errors" list before a single
/// step is executed. Returns the first violation found.
pub fn validate(workflow: &Workflow, known_agents: &HashSet<String>, known_tools: &HashSet<String>) -> Result<(), WorkflowValidationError> {
    let steps = index_steps(workflow)?;

    for step in steps.values() {
        for dep in &step.depends_on {
            if !steps.contains_key(dep.as_str()) {
                return Err(WorkflowValidationError::UnknownDependency {
                    step: step.id.clone(),
                    depends_on: dep.clone(),
                });
            }
        }

        match step.kind {
            StepKind::Dispatch => {
                if let Some(agent) = &step.agent {
                    if !known_agents.contains(agent) {
                        return Err(WorkflowValidationError::UnknownAgent {
                            step: step.id.clone(),
                            agent: agent.clone(),
                        });
                    }
                }
            }
            StepKind::ToolCall => {
                if let Some(tool) = &step.tool {
                    if !known_tools.contains(tool) {
                        return Err(WorkflowValidationError::UnknownTool {
                            step: step.id.clone(),
                            tool: tool.clone(),
                        });
                    }
                }
            }
            StepKind::Condition => {
                let Some(cond) = &step.condition else {
                    return Err(WorkflowValidationError::ConditionMissingTarget { step: step.id.clone() });
                };
                if cond.then.is_empty() {
                    return Err(WorkflowValidationError::ConditionMissingTarget { step: step.id.clone() });
                }
                if !steps.contains_key(cond.then.as_str()) {
                    return Err(WorkflowValidationError::UnknownDependency {
                        step: step.id.clone(),
                        depends_on: cond.then.clone(),
                    });
                }
                if let Some(or_else) = &cond.or_else {
                    if !steps.contains_key(or_else.as_str()) {
                        return Err(WorkflowValidationError::UnknownDependency {
                            step: step.id.clone(),
                            depends_on: or_else.clone(),
                        });
                    }
                }
            }
            StepKind::Parallel => {
                for child in &step.parallel {
                    if !child.depends_on.is_empty() {
                        return Err(WorkflowValidationError::ParallelChildHasExternalDeps {
                            parent: step.id.clone(),
                            child: child.id.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    detect_cycle(&steps)?;
    Ok(())
}

fn detect_cycle(steps: &HashMap<&str, &gantry_types::Step>) -> Result<(), WorkflowValidationError> {
    #[derive(PartialEq, Eq, Clone, Copy)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<String> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        steps: &HashMap<&'a str, &'a gantry_types::Step>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), WorkflowValidationError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(id.to_string());
                return Err(WorkflowValidationError::CycleDetected { steps: path.clone() });
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        path.push(id.to_string());
        if let Some(step) = steps.get(id) {
            for dep in &step.depends_on {
                visit(dep.as_str(), steps, marks, path)?;
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for id in steps.keys() {
        visit(id, steps, &mut marks, &mut path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_types::{OnError, RetryPolicy, Step};
    use std::collections::HashSet;

    fn step(id: &str, kind: StepKind, depends_on: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            kind,
            agent: None,
            prompt_template: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry: RetryPolicy::default(),
            on_error: OnError::Stop,
            timeout: None,
            budget_usd: None,
            condition: None,
            parallel: vec![],
            handoff_from: None,
            handoff_to_agent: None,
            tool: None,
            tool_input_template: None,
            delay: None,
            notify_message: None,
            notify_target: None,
        }
    }

    #[test]
    fn detects_a_cycle() {
        let workflow = Workflow {
            name: "w".to_string(),
            description: None,
            variables: Default::default(),
            steps: vec![
                step("a", StepKind::Delay, &["b"]),
                step("b", StepKind::Delay, &["a"]),
            ],
        };
        let err = validate(&workflow, &HashSet::new(), &HashSet::new()).unwrap_err();
        assert!(matches!(err, WorkflowValidationError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let workflow = Workflow {
            name: "w".to_string(),
            description: None,
            variables: Default::default(),
            steps: vec![step("a", StepKind::Delay, &["ghost"])],
        };
        let err = validate(&workflow, &HashSet::new(), &HashSet::new()).unwrap_err();
        assert!(matches!(err, WorkflowValidationError::UnknownDependency { .. }));
    }

    #[test]
    fn accepts_a_valid_linear_workflow() {
        let workflow = Workflow {
            name: "w".to_string(),
            description: None,
            variables: Default::default(),
            steps: vec![
                step("a", StepKind::Delay, &[]),
                step("b", StepKind::Delay, &["a"]),
            ],
        };
        assert!(validate(&workflow, &HashSet::new(), &HashSet::new()).is_ok());
    }
}
