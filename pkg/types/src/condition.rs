use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A status condition: the source of truth users observe on every object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Set `new` into `conditions`, keeping the existing transition time when the
/// status does not change. Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
                changed = true;
            }
            if existing.reason != new.reason {
                existing.reason = new.reason;
                changed = true;
            }
            if existing.message != new.message {
                existing.message = new.message;
                changed = true;
            }
            changed
        }
        None => {
            conditions.push(new);
            true
        }
    }
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    before != conditions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn transition_time_kept_when_status_unchanged() {
        let mut conditions = Vec::new();
        let mut first = Condition::new("Completed", ConditionStatus::False, "Pending", "");
        first.last_transition_time = Utc::now() - Duration::minutes(5);
        let original_time = first.last_transition_time;
        assert!(set_condition(&mut conditions, first));

        let again = Condition::new("Completed", ConditionStatus::False, "Pending", "");
        assert!(!set_condition(&mut conditions, again));
        assert_eq!(conditions[0].last_transition_time, original_time);

        let reworded = Condition::new("Completed", ConditionStatus::False, "Retrying", "boom");
        assert!(set_condition(&mut conditions, reworded));
        assert_eq!(conditions[0].last_transition_time, original_time);
        assert_eq!(conditions[0].reason, "Retrying");
    }

    #[test]
    fn status_flip_moves_transition_time() {
        let mut conditions = Vec::new();
        let mut first = Condition::new("Completed", ConditionStatus::False, "", "");
        first.last_transition_time = Utc::now() - Duration::minutes(5);
        set_condition(&mut conditions, first.clone());

        set_condition(
            &mut conditions,
            Condition::new("Completed", ConditionStatus::True, "Done", ""),
        );
        assert!(is_condition_true(&conditions, "Completed"));
        assert!(conditions[0].last_transition_time > first.last_transition_time);
    }

    #[test]
    fn wire_shape_uses_type_key() {
        let c = Condition::new("Failed", ConditionStatus::True, "NoSuchCluster", "missing");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "Failed");
        assert_eq!(v["status"], "True");
        assert!(v.get("lastTransitionTime").is_some());
    }
}
