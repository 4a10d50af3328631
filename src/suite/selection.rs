//! Resolution of `suite[:group]` selectors into an ordered plan

use crate::common::config::Config;

/// One plan entry: a suite and the groups requested from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSuite {
    pub suite: String,
    /// Empty means every group
    pub groups: Vec<String>,
}

/// Ordered suites to run, in first-requested order
///
/// Order matters: suites share the device, and a later suite may rely on the
/// cleanup that followed an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPlan {
    entries: Vec<PlannedSuite>,
}

impl SelectionPlan {
    /// Build the plan from user selectors
    ///
    /// No selectors selects every configured suite with all groups. A suite
    /// named more than once keeps its first position and accumulates groups.
    pub fn resolve<S: AsRef<str>>(config: &Config, selectors: &[S]) -> Self {
        let mut plan = SelectionPlan::default();

        if selectors.is_empty() {
            for name in config.suite_names() {
                plan.entry(name);
            }
            return plan;
        }

        for selector in selectors {
            let (suite, group) = parse_selector(selector.as_ref());
            let entry = plan.entry(suite);
            if let Some(group) = group {
                entry.groups.push(group.to_string());
            }
        }
        plan
    }

    fn entry(&mut self, suite: &str) -> &mut PlannedSuite {
        let idx = match self.entries.iter().position(|e| e.suite == suite) {
            Some(idx) => idx,
            None => {
                self.entries.push(PlannedSuite {
                    suite: suite.to_string(),
                    groups: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedSuite> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split `suite:group` at the first colon
///
/// Group names may themselves contain colons or slashes.
pub fn parse_selector(selector: &str) -> (&str, Option<&str>) {
    match selector.split_once(':') {
        Some((suite, group)) => (suite, Some(group)),
        None => (selector, None),
    }
}
