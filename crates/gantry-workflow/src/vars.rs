use std::collections::HashMap;

use gantry_types::StepRunResult;

/// Expands `{{name}}` references. Precedence (later wins on conflict) is
/// workflow defaults → trigger overrides → run-time extraVars → per-step
/// outputs, so callers should merge layers into `vars` in that order
/// before calling this, and pass `step_results` for the
/// `steps.<id>.output`/`steps.<id>.status` forms, looked up independently
/// of the flat `vars` map.
pub fn expand(template: &str, vars: &HashMap<String, String>, step_results: &HashMap<String, StepRunResult>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = after[..end].trim();
        let value = resolve(key, vars, step_results);
        out.push_str(&value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, vars: &HashMap<String, String>, step_results: &HashMap<String, StepRunResult>) -> String {
    if let Some(step_id) = key.strip_prefix("steps.").and_then(|s| s.strip_suffix(".output")) {
        return step_results.get(step_id).map(|r| r.output.clone()).unwrap_or_default();
    }
    if let Some(step_id) = key.strip_prefix("steps.").and_then(|s| s.strip_suffix(".status")) {
        return step_results
            .get(step_id)
            .map(|r| format!("{:?}", r.status).to_lowercase())
            .unwrap_or_default();
    }
    vars.get(key).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_types::StepRunStatus;

    #[test]
    fn expands_plain_variables() {
        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), "rust".to_string());
        assert_eq!(expand("tell me about {{topic}}", &vars, &HashMap::new()), "tell me about rust");
    }

    #[test]
    fn expands_step_output_references() {
        let mut results = HashMap::new();
        let mut fetch = StepRunResult::pending("fetch");
        fetch.output = "hello world".to_string();
        results.insert("fetch".to_string(), fetch);
        assert_eq!(
            expand("summarize: {{steps.fetch.output}}", &HashMap::new(), &results),
            "summarize: hello world"
        );
    }

    #[test]
    fn expands_step_status_references() {
        let mut results = HashMap::new();
        let mut s2a = StepRunResult::pending("s2a");
        s2a.status = StepRunStatus::Success;
        results.insert("s2a".to_string(), s2a);
        assert_eq!(
            expand("{{steps.s2a.status}}", &HashMap::new(), &results),
            "success"
        );
    }

    #[test]
    fn unknown_reference_expands_to_empty_string() {
        assert_eq!(expand("{{missing}}", &HashMap::new(), &HashMap::new()), "");
    }
}
