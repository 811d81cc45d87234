use crate::models::Plan;

/// Result of one hard check against a plan.
#[derive(Debug, Clone)]
pub struct HardCheckResult {
    pub check_name: String,
    pub passed: bool,
    pub message: String,
}

/// A hard validation check that runs as Rust code, ahead of any LLM-based
/// review. Deterministic and cheap; failures here are treated the same as
/// a reviewer-fail (never a hard block on their own).
pub struct CheckDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub validator: fn(&Plan) -> HardCheckResult,
}

/// Collection of hard validation checks run against a Plan before it is
/// handed to the pipeline.
pub struct HardChecklist {
    pub checks: Vec<CheckDefinition>,
}

impl Default for HardChecklist {
    fn default() -> Self {
        Self {
            checks: vec![
                CheckDefinition {
                    name: "has_stages",
                    description: "Plan must have at least one stage",
                    validator: check_has_stages,
                },
                CheckDefinition {
                    name: "stages_have_stories",
                    description: "Each stage must have at least one story",
                    validator: check_stages_have_stories,
                },
                CheckDefinition {
                    name: "no_empty_descriptions",
                    description: "Stories must have non-empty descriptions",
                    validator: check_no_empty_descriptions,
                },
                CheckDefinition {
                    name: "stage_order_stable",
                    description: "Completed stages must precede incomplete ones",
                    validator: check_stage_order_stable,
                },
            ],
        }
    }
}

impl HardChecklist {
    pub fn run_all(&self, plan: &Plan) -> Vec<HardCheckResult> {
        self.checks.iter().map(|check| (check.validator)(plan)).collect()
    }
}

fn check_has_stages(plan: &Plan) -> HardCheckResult {
    let passed = !plan.stages.is_empty();
    HardCheckResult {
        check_name: "has_stages".to_string(),
        passed,
        message: if passed {
            format!("Found {} stages", plan.stages.len())
        } else {
            "Plan has no stages defined".to_string()
        },
    }
}

fn check_stages_have_stories(plan: &Plan) -> HardCheckResult {
    let empty: Vec<_> = plan
        .stages
        .iter()
        .filter(|s| s.stories.is_empty())
        .map(|s| s.name.clone())
        .collect();
    let passed = empty.is_empty();
    HardCheckResult {
        check_name: "stages_have_stories".to_string(),
        passed,
        message: if passed {
            "All stages have stories".to_string()
        } else {
            format!("Stages without stories: {}", empty.join(", "))
        },
    }
}

fn check_no_empty_descriptions(plan: &Plan) -> HardCheckResult {
    let empty_count: usize = plan
        .stages
        .iter()
        .flat_map(|s| s.stories.iter())
        .filter(|s| s.description.trim().is_empty())
        .count();
    let passed = empty_count == 0;
    HardCheckResult {
        check_name: "no_empty_descriptions".to_string(),
        passed,
        message: if passed {
            "All stories have descriptions".to_string()
        } else {
            format!("{} stories have empty descriptions", empty_count)
        },
    }
}

fn check_stage_order_stable(plan: &Plan) -> HardCheckResult {
    // Once a stage later in the list is incomplete, no earlier stage may
    // still be incomplete without it — this mirrors the pipeline's strict
    // in-order processing and catches plans that skip ahead.
    let mut seen_incomplete = false;
    let mut violation = None;
    for stage in &plan.stages {
        if stage.is_completed && seen_incomplete {
            violation = Some(stage.name.clone());
            break;
        }
        if !stage.is_completed {
            seen_incomplete = true;
        }
    }
    let passed = violation.is_none();
    HardCheckResult {
        check_name: "stage_order_stable".to_string(),
        passed,
        message: if passed {
            "Stage completion order is consistent".to_string()
        } else {
            format!(
                "Stage '{}' is complete but an earlier stage is not",
                violation.unwrap()
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Stage, Story};

    fn story() -> Story {
        Story::new("t".into(), "d".into(), Priority::Standard)
    }

    #[test]
    fn empty_plan_fails_has_stages() {
        let plan = Plan::new();
        let results = HardChecklist::default().run_all(&plan);
        let has_stages = results.iter().find(|r| r.check_name == "has_stages").unwrap();
        assert!(!has_stages.passed);
    }

    #[test]
    fn populated_plan_passes_all_checks() {
        let plan = Plan {
            stages: vec![Stage {
                name: "s".into(),
                mission: "m".into(),
                is_completed: false,
                stories: vec![story()],
            }],
        };
        let results = HardChecklist::default().run_all(&plan);
        assert!(results.iter().all(|r| r.passed));
    }
}
