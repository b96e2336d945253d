use std::fmt::Display;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::{
    gen::SchemaGenerator,
    schema::{ArrayValidation, InstanceType, Schema, SchemaObject},
    JsonSchema,
};
use serde::{Deserialize, Serialize};

pub mod applications;
pub mod applicationsets;
pub mod clusters;
pub mod projects;
pub mod repositories;
pub mod tokens;

/// Identifier of the ArgoCD object a resource manages. Set once, never rewritten.
pub static EXTERNAL_NAME_ANNOTATION: &str = "argocd.gitops.dev/external-name";

pub static READY: &str = "Ready";
pub static SYNCED: &str = "Synced";

/// A status condition, as surfaced by `kubectl get`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Ready, Synced)
    pub r#type: String,

    /// Status is the status of the condition (True, False, Unknown)
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message indicating details about last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    fn new(r#type: &str, status: bool, reason: &str) -> Self {
        Self {
            r#type: r#type.into(),
            status: if status { "True" } else { "False" }.into(),
            reason: reason.into(),
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The external resource is observed and healthy
    pub fn available() -> Self {
        Self::new(READY, true, "Available")
    }

    pub fn unavailable() -> Self {
        Self::new(READY, false, "Unavailable")
    }

    pub fn creating() -> Self {
        Self::new(READY, false, "Creating")
    }

    pub fn deleting() -> Self {
        Self::new(READY, false, "Deleting")
    }

    pub fn reconcile_success() -> Self {
        Self::new(SYNCED, true, "ReconcileSuccess")
    }

    pub fn reconcile_error(err: &impl Display) -> Self {
        Self::new(SYNCED, false, "ReconcileError").with_message(err.to_string())
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Status shared by every managed resource: what was last seen in ArgoCD, plus conditions
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedStatus<O> {
    /// The last observed state of the ArgoCD object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<O>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl<O> Default for ManagedStatus<O> {
    fn default() -> Self {
        Self {
            at_provider: None,
            conditions: Vec::new(),
        }
    }
}

impl<O> ManagedStatus<O> {
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Set a condition, replacing any of the same type. The transition time only
    /// moves when the status value changes.
    pub fn set_condition(&mut self, mut condition: Condition) {
        let existing = self
            .conditions
            .iter()
            .position(|c| c.r#type == condition.r#type);

        condition.last_transition_time = match existing.map(|i| &self.conditions[i]) {
            Some(current) if current.status == condition.status => current
                .last_transition_time
                .clone()
                .or_else(|| Some(Time(Utc::now()))),
            _ => Some(Time(Utc::now())),
        };

        match existing {
            Some(i) => self.conditions[i] = condition,
            None => self.conditions.push(condition),
        }
    }
}

/// A key within a Secret. Managed resources are cluster scoped, so the namespace is explicit.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

/// Where connection details (issued credentials) are written
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSecretReference {
    pub name: String,
    pub namespace: String,
}

/// Schema for fields passed through to ArgoCD without interpretation
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".into(), true.into());
    Schema::Object(schema)
}

pub(crate) fn preserve_unknown_fields_list(gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(preserve_unknown_fields(gen).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}
