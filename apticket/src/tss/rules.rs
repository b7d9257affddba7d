// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Restore request rule evaluation.
//!
//! Each AP firmware component may declare a list of condition/action rules.
//! Rules form a first-match decision table: the first rule whose every
//! condition matches the request state is applied and evaluation stops.
//! Unknown condition names never match, so a rule referencing state this
//! client does not track can never smuggle a field into the request.

use plist::{Dictionary, Value};
use tracing::debug;

/// Sentinel action value meaning "leave default behavior".
const ACTION_NOOP: u64 = 255;

/// Recognized condition names. Anything else rejects the whole rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Condition {
    RawProductionMode,
    CurrentProductionMode,
    RawSecurityMode,
    RequiresImage4,
    DemotionPolicyOverride,
    InRomDfu,
}

impl Condition {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ApRawProductionMode" => Some(Self::RawProductionMode),
            "ApCurrentProductionMode" => Some(Self::CurrentProductionMode),
            "ApRawSecurityMode" => Some(Self::RawSecurityMode),
            "ApRequiresImage4" => Some(Self::RequiresImage4),
            "ApDemotionPolicyOverride" => Some(Self::DemotionPolicyOverride),
            "ApInRomDFU" => Some(Self::InRomDfu),
            _ => None,
        }
    }
}

/// Request state a condition can be evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct RequestState<'a> {
    pub request: &'a Dictionary,
    pub supports_img4: bool,
}

impl RequestState<'_> {
    fn lookup(&self, condition: Condition) -> Option<Value> {
        match condition {
            Condition::RawProductionMode | Condition::CurrentProductionMode => {
                self.request.get("ApProductionMode").cloned()
            }
            Condition::RawSecurityMode => self.request.get("ApSecurityMode").cloned(),
            Condition::RequiresImage4 => Some(Value::Boolean(self.supports_img4)),
            Condition::DemotionPolicyOverride => {
                self.request.get("ApDemotionPolicyOverride").cloned()
            }
            Condition::InRomDfu => self.request.get("ApInRomDFU").cloned(),
        }
    }
}

/// One declarative condition/action pair from a component's
/// `RestoreRequestRules` array.
#[derive(Clone, Debug)]
pub struct RestoreRequestRule {
    conditions: Dictionary,
    actions: Dictionary,
}

impl RestoreRequestRule {
    /// Decode a rule entry. Entries without both a `Conditions` and an
    /// `Actions` dictionary are dropped.
    pub fn parse(value: &Value) -> Option<Self> {
        let rule = value.as_dictionary()?;
        let conditions = rule.get("Conditions").and_then(Value::as_dictionary)?;
        let actions = rule.get("Actions").and_then(Value::as_dictionary)?;

        Some(Self {
            conditions: conditions.clone(),
            actions: actions.clone(),
        })
    }

    pub fn parse_all(values: &[Value]) -> Vec<Self> {
        values.iter().filter_map(Self::parse).collect()
    }

    /// Whether every condition matches the current request state.
    fn matches(&self, state: RequestState) -> bool {
        self.conditions.iter().all(|(name, expected)| {
            let Some(condition) = Condition::from_name(name) else {
                debug!("Rejecting rule with unknown condition: {name}");
                return false;
            };

            let actual = state.lookup(condition);

            // An empty string is the manifest's way of spelling "unset".
            match expected {
                Value::String(s) if s.is_empty() => actual.is_none(),
                _ => actual.as_ref() == Some(expected),
            }
        })
    }

    /// Apply the actions: the no-op sentinel leaves defaults alone; any other
    /// value moves the key from the base request onto the component entry.
    fn apply(&self, request: &mut Dictionary, entry: &mut Dictionary) {
        for (key, value) in self.actions.iter() {
            if matches!(value, Value::Integer(i) if i.as_unsigned() == Some(ACTION_NOOP)) {
                continue;
            }

            request.remove(key);
            entry.insert(key.clone(), value.clone());
        }
    }
}

/// Evaluate a component's rules against the request under construction and
/// apply the first fully matching one, if any. Deterministic and idempotent
/// for an unchanged state.
pub fn evaluate(
    rules: &[RestoreRequestRule],
    request: &mut Dictionary,
    supports_img4: bool,
    entry: &mut Dictionary,
) {
    let matched = rules.iter().find(|rule| {
        rule.matches(RequestState {
            request,
            supports_img4,
        })
    });

    if let Some(rule) = matched {
        rule.apply(request, entry);
    }
}
