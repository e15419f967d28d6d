//! Audit request parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

fn default_positive_label() -> Value {
    Value::from(1)
}

/// Request body accepted by the audit endpoints.
///
/// The owner is not part of the body; it comes from the caller's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPayload {
    /// Dataset to audit.
    pub dataset_id: i64,
    /// Model to audit.
    pub model_id: i64,
    /// Protected attribute column, if fairness should be evaluated.
    #[serde(default)]
    pub sensitive_attribute: Option<String>,
    /// Values of the protected attribute treated as privileged.
    #[serde(default)]
    pub privileged_values: Vec<Value>,
    /// Values of the protected attribute treated as unprivileged.
    #[serde(default)]
    pub unprivileged_values: Vec<Value>,
    /// Label counted as the favourable outcome.
    #[serde(default = "default_positive_label")]
    pub positive_label: Value,
}

impl AuditPayload {
    /// Creates a payload for a dataset/model pair with no protected attribute.
    #[must_use]
    pub fn new(dataset_id: i64, model_id: i64) -> Self {
        Self {
            dataset_id,
            model_id,
            sensitive_attribute: None,
            privileged_values: Vec::new(),
            unprivileged_values: Vec::new(),
            positive_label: default_positive_label(),
        }
    }

    /// Sets the protected attribute and its group values.
    #[must_use]
    pub fn with_protected_attribute(
        mut self,
        name: impl Into<String>,
        privileged: Vec<Value>,
        unprivileged: Vec<Value>,
    ) -> Self {
        self.sensitive_attribute = Some(name.into());
        self.privileged_values = privileged;
        self.unprivileged_values = unprivileged;
        self
    }

    /// Binds the payload to its owner.
    #[must_use]
    pub fn into_request(self, owner_id: Uuid) -> AuditRequest {
        AuditRequest {
            owner_id,
            payload: self,
        }
    }
}

/// A payload bound to the identity that submitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    /// The submitting user.
    pub owner_id: Uuid,
    /// The request parameters.
    #[serde(flatten)]
    pub payload: AuditPayload,
}

/// Borrowed view of a configured protected attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectedAttribute<'a> {
    /// Column name.
    pub name: &'a str,
    /// Privileged group values.
    pub privileged: &'a [Value],
    /// Unprivileged group values.
    pub unprivileged: &'a [Value],
}

impl AuditRequest {
    /// Dataset id.
    #[must_use]
    pub fn dataset_id(&self) -> i64 {
        self.payload.dataset_id
    }

    /// Model id.
    #[must_use]
    pub fn model_id(&self) -> i64 {
        self.payload.model_id
    }

    /// Favourable label.
    #[must_use]
    pub fn positive_label(&self) -> &Value {
        &self.payload.positive_label
    }

    /// Returns the protected attribute, treating a blank name as absent.
    #[must_use]
    pub fn protected_attribute(&self) -> Option<ProtectedAttribute<'_>> {
        let name = self.payload.sensitive_attribute.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(ProtectedAttribute {
            name,
            privileged: &self.payload.privileged_values,
            unprivileged: &self.payload.unprivileged_values,
        })
    }

    /// Columns every analysis must exclude from the feature matrix.
    #[must_use]
    pub fn excluded_columns(&self) -> Vec<String> {
        self.protected_attribute()
            .map(|attr| vec![attr.name.to_string()])
            .unwrap_or_default()
    }
}
