use serde_json::Value;

use super::conditions::ConditionSet;
use super::{Action, Subject};

/// A single compiled rule. Declaration order is significant: the last rule
/// matching a check decides it, so a cannot-rule appended after a can-rule
/// narrows the grant.
#[derive(Debug, Clone)]
pub struct Rule {
    pub action: Action,
    pub subject: Subject,
    pub conditions: ConditionSet,
    /// `true` marks a cannot-rule.
    pub inverted: bool,
    /// Optional field-level restriction carried for UI consumers.
    pub fields: Vec<String>,
}

impl Rule {
    fn matches(&self, action: Action, subject: Subject, data: Option<&Value>) -> bool {
        let action_matches = self.action == Action::Manage || self.action == action;
        let subject_matches = self.subject == Subject::All || self.subject == subject;
        if !action_matches || !subject_matches {
            return false;
        }
        if self.conditions.is_empty() {
            return true;
        }
        // A conditioned rule never matches a check without data.
        match data {
            Some(data) => self.conditions.matches(data),
            None => false,
        }
    }
}

/// Compiled, immutable permission checker derived from one user snapshot.
#[derive(Debug, Clone, Default)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    /// Scan the rules in declaration order; the final answer is the
    /// allow/deny polarity of the last matching rule. No match denies.
    pub fn can(&self, action: Action, subject: Subject, data: Option<&Value>) -> bool {
        let mut verdict = false;
        let mut matched = false;
        for rule in &self.rules {
            if rule.matches(action, subject, data) {
                verdict = !rule.inverted;
                matched = true;
            }
        }
        tracing::debug!(?action, ?subject, matched, allowed = verdict, "ability check");
        matched && verdict
    }

    pub fn cannot(&self, action: Action, subject: Subject, data: Option<&Value>) -> bool {
        !self.can(action, subject, data)
    }

    /// Field restriction of the last matching allow rule, if any.
    /// An empty list means the rule does not restrict fields.
    pub fn permitted_fields(&self, action: Action, subject: Subject, data: Option<&Value>) -> Option<Vec<String>> {
        let mut fields = None;
        for rule in &self.rules {
            if rule.matches(action, subject, data) {
                fields = if rule.inverted { None } else { Some(rule.fields.clone()) };
            }
        }
        fields
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Accumulates rules in construction order.
#[derive(Debug, Default)]
pub struct AbilityBuilder {
    rules: Vec<Rule>,
}

impl AbilityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can(&mut self, action: Action, subject: Subject, conditions: ConditionSet) -> &mut Self {
        self.rules.push(Rule {
            action,
            subject,
            conditions,
            inverted: false,
            fields: Vec::new(),
        });
        self
    }

    pub fn can_fields(
        &mut self,
        action: Action,
        subject: Subject,
        conditions: ConditionSet,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.rules.push(Rule {
            action,
            subject,
            conditions,
            inverted: false,
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn cannot(&mut self, action: Action, subject: Subject, conditions: ConditionSet) -> &mut Self {
        self.rules.push(Rule {
            action,
            subject,
            conditions,
            inverted: true,
            fields: Vec::new(),
        });
        self
    }

    pub fn build(self) -> Ability {
        Ability { rules: self.rules }
    }
}

/// Boolean wrapper around [`Ability::can`] that swallows any evaluation
/// fault and reports a denial instead. Callers get a plain bool, never a
/// panic, matching the contract of the UI-facing check.
pub fn check_ability(ability: &Ability, action: Action, subject: Subject, data: Option<&Value>) -> bool {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ability.can(action, subject, data)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_rules_denies_everything() {
        let ability = AbilityBuilder::new().build();
        assert!(!ability.can(Action::Read, Subject::Patient, None));
    }

    #[test]
    fn manage_matches_any_action_and_all_any_subject() {
        let mut builder = AbilityBuilder::new();
        builder.can(Action::Manage, Subject::All, ConditionSet::new());
        let ability = builder.build();

        assert!(ability.can(Action::Delete, Subject::Invoice, None));
        assert!(ability.can(Action::Schedule, Subject::ShiftSchedule, None));
    }

    #[test]
    fn later_cannot_narrows_earlier_can() {
        let mut builder = AbilityBuilder::new();
        builder.can(Action::Read, Subject::MedicalRecord, ConditionSet::new());
        builder.cannot(
            Action::Read,
            Subject::MedicalRecord,
            ConditionSet::new().within("type", ["Diagnosis"]),
        );
        let ability = builder.build();

        assert!(!ability.can(Action::Read, Subject::MedicalRecord, Some(&json!({"type": "Diagnosis"}))));
        assert!(ability.can(Action::Read, Subject::MedicalRecord, Some(&json!({"type": "VitalSigns"}))));
    }

    #[test]
    fn earlier_cannot_is_overridden_by_later_can() {
        let mut builder = AbilityBuilder::new();
        builder.cannot(Action::Update, Subject::User, ConditionSet::new());
        builder.can(Action::Update, Subject::User, ConditionSet::new().eq("id", "u1"));
        let ability = builder.build();

        assert!(ability.can(Action::Update, Subject::User, Some(&json!({"id": "u1"}))));
        assert!(!ability.can(Action::Update, Subject::User, Some(&json!({"id": "u2"}))));
    }

    #[test]
    fn conditioned_rule_needs_data() {
        let mut builder = AbilityBuilder::new();
        builder.can(Action::Read, Subject::Timesheet, ConditionSet::new().eq("organization_id", "org-1"));
        let ability = builder.build();

        assert!(!ability.can(Action::Read, Subject::Timesheet, None));
        assert!(ability.can(Action::Read, Subject::Timesheet, Some(&json!({"organization_id": "org-1"}))));
    }

    #[test]
    fn permitted_fields_come_from_last_allow() {
        let mut builder = AbilityBuilder::new();
        builder.can_fields(Action::Read, Subject::Patient, ConditionSet::new(), ["id", "name"]);
        let ability = builder.build();

        assert_eq!(
            ability.permitted_fields(Action::Read, Subject::Patient, None),
            Some(vec!["id".to_string(), "name".to_string()])
        );
        assert_eq!(ability.permitted_fields(Action::Delete, Subject::Patient, None), None);
    }

    #[test]
    fn check_ability_reports_plain_denial() {
        let ability = AbilityBuilder::new().build();
        assert!(!check_ability(&ability, Action::Read, Subject::All, None));
    }
}
