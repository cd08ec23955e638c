//! Constraint checks over household candidates.
//!
//! A constraint applies when its `when` condition matches the candidate
//! record and is violated when `require` then fails. The caller decides
//! what a violation means (redraw or record); this module only reports
//! which constraints were violated, in declaration order.

use cityweave_rules::{AttrRecord, ConstraintRule};

/// Result of checking one candidate against every constraint rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintOutcome {
    /// Names of violated constraints, in declaration order.
    pub violated: Vec<String>,
}

impl ConstraintOutcome {
    /// True when no constraint was violated.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violated.is_empty()
    }
}

/// Checks a candidate record against every constraint.
///
/// A rule whose `when` or `require` cannot be evaluated is skipped with
/// a warning and counts as satisfied.
#[must_use]
pub fn check_constraints(rules: &[ConstraintRule], record: &AttrRecord) -> ConstraintOutcome {
    let mut violated = Vec::new();
    for rule in rules {
        let applies = match rule.when.evaluate(record) {
            Ok(applies) => applies,
            Err(err) => {
                log::warn!("Constraint '{}' skipped: {err}", rule.name);
                continue;
            }
        };
        if !applies {
            continue;
        }
        match rule.require.evaluate(record) {
            Ok(true) => {}
            Ok(false) => violated.push(rule.name.clone()),
            Err(err) => log::warn!("Constraint '{}' skipped: {err}", rule.name),
        }
    }
    ConstraintOutcome { violated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cityweave_rules::RuleSet;

    fn constraint_rules(toml_rules: &str) -> Vec<ConstraintRule> {
        let zones = r#"
            [[zones]]
            name = "inner"
            min_distance = 0.0
        "#;
        RuleSet::from_toml_str(&format!("{zones}\n{toml_rules}"))
            .unwrap()
            .constraint_rules
    }

    fn record(unit_size: f64, residents: u32) -> AttrRecord {
        AttrRecord::new()
            .with("unit_size", unit_size)
            .with("num_residents", residents)
    }

    #[test]
    fn satisfied_constraint_is_clean() {
        let rules = constraint_rules(
            r#"
            [[constraint_rules]]
            name = "small units stay small households"
            when = "unit_size < 40"
            require = "num_residents <= 2"
        "#,
        );
        assert!(check_constraints(&rules, &record(35.0, 2)).is_clean());
    }

    #[test]
    fn violated_constraint_reports_its_name() {
        let rules = constraint_rules(
            r#"
            [[constraint_rules]]
            name = "small units stay small households"
            when = "unit_size < 40"
            require = "num_residents <= 2"
        "#,
        );
        let outcome = check_constraints(&rules, &record(35.0, 5));
        assert_eq!(outcome.violated, vec!["small units stay small households"]);
    }

    #[test]
    fn non_applicable_constraint_is_ignored() {
        let rules = constraint_rules(
            r#"
            [[constraint_rules]]
            name = "small units stay small households"
            when = "unit_size < 40"
            require = "num_residents <= 2"
        "#,
        );
        assert!(check_constraints(&rules, &record(80.0, 6)).is_clean());
    }

    #[test]
    fn unevaluable_constraint_is_skipped() {
        let rules = constraint_rules(
            r#"
            [[constraint_rules]]
            name = "needs missing attribute"
            when = "floor_area > 100"
            require = "num_residents <= 2"
        "#,
        );
        // The record has no floor_area, so the rule is skipped, not violated.
        assert!(check_constraints(&rules, &record(35.0, 6)).is_clean());
    }

    #[test]
    fn violations_keep_declaration_order() {
        let rules = constraint_rules(
            r#"
            [[constraint_rules]]
            name = "first"
            when = "num_residents > 0"
            require = "num_residents < 2"

            [[constraint_rules]]
            name = "second"
            when = "unit_size > 0"
            require = "unit_size > 100"
        "#,
        );
        let outcome = check_constraints(&rules, &record(50.0, 4));
        assert_eq!(outcome.violated, vec!["first", "second"]);
    }
}
