use serde_json::Value;

/// A single comparison against a field of the checked data.
///
/// The operator set is closed: equality, `$ne`, `$in` and `$exists` are the
/// only forms the rule templates use, and no general query language is
/// supported beyond them.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Exists(bool),
}

impl Condition {
    fn matches(&self, field_value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => field_value == Some(expected),
            Condition::Ne(expected) => field_value != Some(expected),
            Condition::In(choices) => match field_value {
                Some(value) => choices.contains(value),
                None => false,
            },
            Condition::Exists(expected) => {
                let present = matches!(field_value, Some(v) if !v.is_null());
                present == *expected
            }
        }
    }
}

/// Ordered set of field-path keyed conditions. All entries must hold for a
/// rule to match; an empty set always holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    entries: Vec<(String, Condition)>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.entries.push((field.into(), condition));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    pub fn within<V: Into<Value>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.with(field, Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn exists(self, field: impl Into<String>, expected: bool) -> Self {
        self.with(field, Condition::Exists(expected))
    }

    /// Evaluate every condition against `data`. A rule carrying conditions
    /// can only match when data was supplied, so `matches` is never called
    /// with synthetic defaults.
    pub fn matches(&self, data: &Value) -> bool {
        self.entries
            .iter()
            .all(|(field, condition)| condition.matches(lookup(data, field)))
    }

    /// Parse the stored JSON form of a condition mapping, e.g.
    /// `{"organization_id": "...", "type": {"$in": ["LabResult"]}}`.
    /// Unknown operator keys are rejected rather than ignored.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(map) => map,
            other => return Err(format!("conditions must be an object, got {other}")),
        };

        let mut set = Self::new();
        for (field, encoded) in object {
            let condition = match encoded {
                Value::Object(ops) => {
                    if ops.len() != 1 {
                        return Err(format!("condition on `{field}` must hold exactly one operator"));
                    }
                    let (op, operand) = ops.iter().next().expect("len checked above");
                    match op.as_str() {
                        "$ne" => Condition::Ne(operand.clone()),
                        "$in" => match operand {
                            Value::Array(items) => Condition::In(items.clone()),
                            _ => return Err(format!("$in on `{field}` requires an array")),
                        },
                        "$exists" => match operand {
                            Value::Bool(expected) => Condition::Exists(*expected),
                            _ => return Err(format!("$exists on `{field}` requires a boolean")),
                        },
                        other => return Err(format!("unsupported operator `{other}` on `{field}`")),
                    }
                }
                plain => Condition::Eq(plain.clone()),
            };
            set.entries.push((field.clone(), condition));
        }
        Ok(set)
    }

    /// Serialize back to the stored JSON form.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (field, condition) in &self.entries {
            let encoded = match condition {
                Condition::Eq(v) => v.clone(),
                Condition::Ne(v) => serde_json::json!({ "$ne": v }),
                Condition::In(vs) => serde_json::json!({ "$in": vs }),
                Condition::Exists(b) => serde_json::json!({ "$exists": b }),
            };
            map.insert(field.clone(), encoded);
        }
        Value::Object(map)
    }
}

/// Resolve a dotted field path against nested JSON objects.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_matches_exact_value() {
        let set = ConditionSet::new().eq("organization_id", "org-1");
        assert!(set.matches(&json!({"organization_id": "org-1"})));
        assert!(!set.matches(&json!({"organization_id": "org-2"})));
        assert!(!set.matches(&json!({})));
    }

    #[test]
    fn ne_matches_missing_field() {
        // `$ne` holds when the field is absent; only an equal value fails it.
        let set = ConditionSet::new().ne("status", "approved");
        assert!(set.matches(&json!({"status": "pending"})));
        assert!(set.matches(&json!({})));
        assert!(!set.matches(&json!({"status": "approved"})));
    }

    #[test]
    fn in_operator_requires_membership() {
        let set = ConditionSet::new().within("type", ["Diagnosis", "LabResult"]);
        assert!(set.matches(&json!({"type": "Diagnosis"})));
        assert!(!set.matches(&json!({"type": "VitalSigns"})));
        assert!(!set.matches(&json!({})));
    }

    #[test]
    fn exists_checks_presence() {
        let set = ConditionSet::new().exists("department_id", true);
        assert!(set.matches(&json!({"department_id": "d1"})));
        assert!(!set.matches(&json!({"department_id": null})));
        assert!(!set.matches(&json!({})));

        let absent = ConditionSet::new().exists("department_id", false);
        assert!(absent.matches(&json!({})));
        assert!(!absent.matches(&json!({"department_id": "d1"})));
    }

    #[test]
    fn dotted_paths_resolve_nested_objects() {
        let set = ConditionSet::new().eq("shift.organization_id", "org-1");
        assert!(set.matches(&json!({"shift": {"organization_id": "org-1"}})));
        assert!(!set.matches(&json!({"shift": {}})));
    }

    #[test]
    fn json_round_trip_preserves_operators() {
        let raw = json!({
            "organization_id": "org-1",
            "status": {"$ne": "approved"},
            "type": {"$in": ["LabResult"]},
            "department_id": {"$exists": true}
        });
        let set = ConditionSet::from_value(&raw).unwrap();
        assert_eq!(ConditionSet::from_value(&set.to_value()).unwrap(), set);
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let raw = json!({"age": {"$gt": 3}});
        assert!(ConditionSet::from_value(&raw).is_err());
    }
}
