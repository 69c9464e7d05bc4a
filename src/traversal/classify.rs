//! Assembly/Part classification
//!
//! Kernel metadata under-reports assemblies often enough that a single flag
//! is not trusted. Classification runs an ordered list of rules and stops at
//! the first one that matches; a label no rule matches is a Part.

use crate::model::NodeKind;

/// Name fragments that mark a label as an assembly by default
///
/// Matched case-insensitively as substrings.
pub const DEFAULT_ASSEMBLY_PATTERNS: &[&str] = &["assembly", "装配体", "envelope", "l-type"];

/// What the traversal learned about one label before classifying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFacts<'a> {
    /// The kernel's own assembly flag
    pub kernel_flag: bool,
    /// Number of component labels
    pub component_count: usize,
    /// Display name
    pub name: &'a str,
    /// Sub-shape count when the label's shape is a compound
    pub compound_children: Option<usize>,
}

/// One classification heuristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierRule {
    /// The kernel flags the label as an assembly
    KernelFlag,
    /// The label has at least one component
    HasComponents,
    /// The name contains one of these fragments, ignoring case
    NamePattern(Vec<String>),
    /// The shape is a compound of more than one sub-shape
    CompoundShape,
}

impl ClassifierRule {
    /// Default name-pattern rule
    pub fn default_name_pattern() -> Self {
        ClassifierRule::NamePattern(
            DEFAULT_ASSEMBLY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        )
    }

    /// Whether this rule marks the label as an assembly
    pub fn matches(&self, facts: &LabelFacts<'_>) -> bool {
        match self {
            ClassifierRule::KernelFlag => facts.kernel_flag,
            ClassifierRule::HasComponents => facts.component_count > 0,
            ClassifierRule::NamePattern(patterns) => {
                let name = facts.name.to_lowercase();
                patterns
                    .iter()
                    .any(|p| !p.is_empty() && name.contains(&p.to_lowercase()))
            }
            ClassifierRule::CompoundShape => facts.compound_children.is_some_and(|n| n > 1),
        }
    }
}

/// Ordered, short-circuiting rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Classifier {
    /// Classifier with an explicit rule order
    pub fn with_rules(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    /// The rules in evaluation order
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Index of the first matching rule, if any
    pub fn first_match(&self, facts: &LabelFacts<'_>) -> Option<usize> {
        self.rules.iter().position(|r| r.matches(facts))
    }

    /// Classify a label
    pub fn classify(&self, facts: &LabelFacts<'_>) -> NodeKind {
        if self.first_match(facts).is_some() {
            NodeKind::Assembly
        } else {
            NodeKind::Part
        }
    }
}

impl Default for Classifier {
    /// Kernel flag, then component count, then name pattern, then compound shape
    fn default() -> Self {
        Self::with_rules(vec![
            ClassifierRule::KernelFlag,
            ClassifierRule::HasComponents,
            ClassifierRule::default_name_pattern(),
            ClassifierRule::CompoundShape,
        ])
    }
}
