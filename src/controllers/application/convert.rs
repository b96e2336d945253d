//! Application spec <-> ArgoCD wire conversion, and status observation.
//!
//! Forward conversion maps `None` to the wire's zero value; reverse conversion maps zero
//! values back to `None`. Both are total.

use crate::argocd::applications as argo;
use crate::engine::compare::{non_empty, non_empty_list, non_empty_map, non_false};
use crate::resources::applications::*;

pub fn spec_to_wire(params: &ApplicationSpecParameters) -> argo::ApplicationSpec {
    argo::ApplicationSpec {
        source: params.source.as_ref().map(source_to_wire),
        sources: params
            .sources
            .iter()
            .flatten()
            .map(source_to_wire)
            .collect(),
        destination: argo::ApplicationDestination {
            server: params.destination.server.clone().unwrap_or_default(),
            namespace: params.destination.namespace.clone().unwrap_or_default(),
            name: params.destination.name.clone().unwrap_or_default(),
        },
        project: params.project.clone().unwrap_or_default(),
        sync_policy: params.sync_policy.as_ref().map(sync_policy_to_wire),
        ignore_differences: params
            .ignore_differences
            .iter()
            .flatten()
            .map(|d| argo::ResourceIgnoreDifferences {
                group: d.group.clone().unwrap_or_default(),
                kind: d.kind.clone(),
                name: d.name.clone().unwrap_or_default(),
                namespace: d.namespace.clone().unwrap_or_default(),
                json_pointers: d.json_pointers.clone().unwrap_or_default(),
                jq_path_expressions: d.jq_path_expressions.clone().unwrap_or_default(),
                managed_fields_managers: d.managed_fields_managers.clone().unwrap_or_default(),
            })
            .collect(),
        info: params
            .info
            .iter()
            .flatten()
            .map(|i| argo::Info {
                name: i.name.clone(),
                value: i.value.clone(),
            })
            .collect(),
        revision_history_limit: params.revision_history_limit,
    }
}

pub fn spec_from_wire(spec: &argo::ApplicationSpec) -> ApplicationSpecParameters {
    ApplicationSpecParameters {
        project: non_empty(&spec.project),
        source: spec.source.as_ref().map(source_from_wire),
        sources: (!spec.sources.is_empty())
            .then(|| spec.sources.iter().map(source_from_wire).collect()),
        destination: ApplicationDestination {
            server: non_empty(&spec.destination.server),
            namespace: non_empty(&spec.destination.namespace),
            name: non_empty(&spec.destination.name),
        },
        sync_policy: spec.sync_policy.as_ref().map(sync_policy_from_wire),
        ignore_differences: (!spec.ignore_differences.is_empty()).then(|| {
            spec.ignore_differences
                .iter()
                .map(|d| ResourceIgnoreDifferences {
                    group: non_empty(&d.group),
                    kind: d.kind.clone(),
                    name: non_empty(&d.name),
                    namespace: non_empty(&d.namespace),
                    json_pointers: non_empty_list(&d.json_pointers),
                    jq_path_expressions: non_empty_list(&d.jq_path_expressions),
                    managed_fields_managers: non_empty_list(&d.managed_fields_managers),
                })
                .collect()
        }),
        info: info_from_wire(&spec.info),
        revision_history_limit: spec.revision_history_limit,
    }
}

pub(super) fn info_from_wire(info: &[argo::Info]) -> Option<Vec<Info>> {
    (!info.is_empty()).then(|| {
        info.iter()
            .map(|i| Info {
                name: i.name.clone(),
                value: i.value.clone(),
            })
            .collect()
    })
}

fn source_to_wire(source: &ApplicationSource) -> argo::ApplicationSource {
    argo::ApplicationSource {
        repo_url: source.repo_url.clone(),
        path: source.path.clone().unwrap_or_default(),
        target_revision: source.target_revision.clone().unwrap_or_default(),
        helm: source.helm.as_ref().map(|h| argo::ApplicationSourceHelm {
            value_files: h.value_files.clone().unwrap_or_default(),
            parameters: h
                .parameters
                .iter()
                .flatten()
                .map(|p| argo::HelmParameter {
                    name: p.name.clone(),
                    value: p.value.clone(),
                    force_string: p.force_string.unwrap_or_default(),
                })
                .collect(),
            release_name: h.release_name.clone().unwrap_or_default(),
            values: h.values.clone().unwrap_or_default(),
            pass_credentials: h.pass_credentials.unwrap_or_default(),
            skip_crds: h.skip_crds.unwrap_or_default(),
            version: h.version.clone().unwrap_or_default(),
        }),
        kustomize: source
            .kustomize
            .as_ref()
            .map(|k| argo::ApplicationSourceKustomize {
                name_prefix: k.name_prefix.clone().unwrap_or_default(),
                name_suffix: k.name_suffix.clone().unwrap_or_default(),
                images: k.images.clone().unwrap_or_default(),
                common_labels: k.common_labels.clone().unwrap_or_default(),
                common_annotations: k.common_annotations.clone().unwrap_or_default(),
                version: k.version.clone().unwrap_or_default(),
                namespace: k.namespace.clone().unwrap_or_default(),
            }),
        directory: source
            .directory
            .as_ref()
            .map(|d| argo::ApplicationSourceDirectory {
                recurse: d.recurse.unwrap_or_default(),
                exclude: d.exclude.clone().unwrap_or_default(),
                include: d.include.clone().unwrap_or_default(),
            }),
        plugin: source.plugin.as_ref().map(|p| argo::ApplicationSourcePlugin {
            name: p.name.clone().unwrap_or_default(),
            env: p
                .env
                .iter()
                .flatten()
                .map(|e| argo::EnvEntry {
                    name: e.name.clone(),
                    value: e.value.clone(),
                })
                .collect(),
        }),
        chart: source.chart.clone().unwrap_or_default(),
        r#ref: source.r#ref.clone().unwrap_or_default(),
        name: source.name.clone().unwrap_or_default(),
    }
}

fn source_from_wire(source: &argo::ApplicationSource) -> ApplicationSource {
    ApplicationSource {
        repo_url: source.repo_url.clone(),
        path: non_empty(&source.path),
        target_revision: non_empty(&source.target_revision),
        chart: non_empty(&source.chart),
        r#ref: non_empty(&source.r#ref),
        name: non_empty(&source.name),
        helm: source.helm.as_ref().map(|h| ApplicationSourceHelm {
            value_files: non_empty_list(&h.value_files),
            values: non_empty(&h.values),
            parameters: (!h.parameters.is_empty()).then(|| {
                h.parameters
                    .iter()
                    .map(|p| HelmParameter {
                        name: p.name.clone(),
                        value: p.value.clone(),
                        force_string: non_false(p.force_string),
                    })
                    .collect()
            }),
            release_name: non_empty(&h.release_name),
            pass_credentials: non_false(h.pass_credentials),
            skip_crds: non_false(h.skip_crds),
            version: non_empty(&h.version),
        }),
        kustomize: source
            .kustomize
            .as_ref()
            .map(|k| ApplicationSourceKustomize {
                name_prefix: non_empty(&k.name_prefix),
                name_suffix: non_empty(&k.name_suffix),
                images: non_empty_list(&k.images),
                common_labels: non_empty_map(&k.common_labels),
                common_annotations: non_empty_map(&k.common_annotations),
                version: non_empty(&k.version),
                namespace: non_empty(&k.namespace),
            }),
        directory: source
            .directory
            .as_ref()
            .map(|d| ApplicationSourceDirectory {
                recurse: non_false(d.recurse),
                include: non_empty(&d.include),
                exclude: non_empty(&d.exclude),
            }),
        plugin: source.plugin.as_ref().map(|p| ApplicationSourcePlugin {
            name: non_empty(&p.name),
            env: (!p.env.is_empty()).then(|| {
                p.env
                    .iter()
                    .map(|e| EnvEntry {
                        name: e.name.clone(),
                        value: e.value.clone(),
                    })
                    .collect()
            }),
        }),
    }
}

pub(super) fn sync_policy_to_wire(policy: &SyncPolicy) -> argo::SyncPolicy {
    argo::SyncPolicy {
        automated: policy
            .automated
            .as_ref()
            .map(|a| argo::SyncPolicyAutomated {
                prune: a.prune.unwrap_or_default(),
                self_heal: a.self_heal.unwrap_or_default(),
                allow_empty: a.allow_empty.unwrap_or_default(),
            }),
        sync_options: policy.sync_options.clone().unwrap_or_default(),
        retry: policy.retry.as_ref().map(|r| argo::RetryStrategy {
            limit: r.limit.unwrap_or_default(),
            backoff: r.backoff.as_ref().map(|b| argo::Backoff {
                duration: b.duration.clone().unwrap_or_default(),
                factor: b.factor,
                max_duration: b.max_duration.clone().unwrap_or_default(),
            }),
        }),
        managed_namespace_metadata: policy.managed_namespace_metadata.as_ref().map(|m| {
            argo::ManagedNamespaceMetadata {
                labels: m.labels.clone().unwrap_or_default(),
                annotations: m.annotations.clone().unwrap_or_default(),
            }
        }),
    }
}

pub(super) fn sync_policy_from_wire(policy: &argo::SyncPolicy) -> SyncPolicy {
    SyncPolicy {
        automated: policy.automated.as_ref().map(|a| SyncPolicyAutomated {
            prune: non_false(a.prune),
            self_heal: non_false(a.self_heal),
            allow_empty: non_false(a.allow_empty),
        }),
        sync_options: non_empty_list(&policy.sync_options),
        retry: policy.retry.as_ref().map(|r| RetryStrategy {
            limit: (r.limit != 0).then_some(r.limit),
            backoff: r.backoff.as_ref().map(|b| Backoff {
                duration: non_empty(&b.duration),
                factor: b.factor,
                max_duration: non_empty(&b.max_duration),
            }),
        }),
        managed_namespace_metadata: policy.managed_namespace_metadata.as_ref().map(|m| {
            ManagedNamespaceMetadata {
                labels: non_empty_map(&m.labels),
                annotations: non_empty_map(&m.annotations),
            }
        }),
    }
}

pub fn observation(status: Option<&argo::ApplicationStatus>) -> ApplicationObservation {
    let Some(status) = status else {
        return ApplicationObservation::default();
    };

    ApplicationObservation {
        sync: (!status.sync.status.is_empty()).then(|| SyncStatus {
            status: status.sync.status.clone(),
            revision: non_empty(&status.sync.revision),
            revisions: status.sync.revisions.clone(),
        }),
        health: health(&status.health),
        history: status
            .history
            .iter()
            .map(|h| RevisionHistory {
                id: h.id,
                revision: h.revision.clone(),
                deployed_at: h.deployed_at.clone(),
            })
            .collect(),
        operation_state: status.operation_state.as_ref().map(|o| OperationState {
            phase: o.phase.clone(),
            message: non_empty(&o.message),
            started_at: o.started_at.clone(),
            finished_at: o.finished_at.clone(),
        }),
        resources: status
            .resources
            .iter()
            .map(|r| ResourceStatus {
                group: non_empty(&r.group),
                version: r.version.clone(),
                kind: r.kind.clone(),
                namespace: non_empty(&r.namespace),
                name: r.name.clone(),
                status: non_empty(&r.status),
                health: r.health.as_ref().and_then(health),
                requires_pruning: r.requires_pruning,
            })
            .collect(),
        conditions: status
            .conditions
            .iter()
            .map(|c| ApplicationCondition {
                r#type: c.type_.clone(),
                message: c.message.clone(),
            })
            .collect(),
        reconciled_at: status.reconciled_at.clone(),
        source_type: non_empty(&status.source_type),
        summary: (!status.summary.images.is_empty() || !status.summary.external_urls.is_empty())
            .then(|| ApplicationSummary {
                external_urls: status.summary.external_urls.clone(),
                images: status.summary.images.clone(),
            }),
    }
}

fn health(health: &argo::HealthStatus) -> Option<HealthStatus> {
    (!health.status.is_empty()).then(|| HealthStatus {
        status: health.status.clone(),
        message: non_empty(&health.message),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::*;

    /// Every field set to a non-zero value
    pub fn full_spec() -> ApplicationSpecParameters {
        ApplicationSpecParameters {
            project: Some("team-a".into()),
            source: Some(ApplicationSource {
                repo_url: "https://github.com/argoproj/argocd-example-apps.git".into(),
                path: Some("helm-guestbook".into()),
                target_revision: Some("HEAD".into()),
                chart: None,
                r#ref: Some("values".into()),
                name: Some("guestbook".into()),
                helm: Some(ApplicationSourceHelm {
                    value_files: Some(vec!["values-prod.yaml".into()]),
                    values: Some("replicaCount: 2\n".into()),
                    parameters: Some(vec![HelmParameter {
                        name: "image.tag".into(),
                        value: "v2".into(),
                        force_string: Some(true),
                    }]),
                    release_name: Some("guestbook".into()),
                    pass_credentials: Some(true),
                    skip_crds: Some(true),
                    version: Some("v3".into()),
                }),
                kustomize: None,
                directory: None,
                plugin: None,
            }),
            sources: Some(vec![ApplicationSource {
                repo_url: "https://charts.example.com".into(),
                chart: Some("redis".into()),
                target_revision: Some("17.0.0".into()),
                kustomize: Some(ApplicationSourceKustomize {
                    name_prefix: Some("pre-".into()),
                    name_suffix: Some("-suf".into()),
                    images: Some(vec!["redis:7".into()]),
                    common_labels: Some(BTreeMap::from([("team".into(), "a".into())])),
                    common_annotations: Some(BTreeMap::from([("note".into(), "x".into())])),
                    version: Some("v5".into()),
                    namespace: Some("cache".into()),
                }),
                directory: Some(ApplicationSourceDirectory {
                    recurse: Some(true),
                    include: Some("*.yaml".into()),
                    exclude: Some("test/*".into()),
                }),
                plugin: Some(ApplicationSourcePlugin {
                    name: Some("envsubst".into()),
                    env: Some(vec![EnvEntry {
                        name: "FOO".into(),
                        value: "bar".into(),
                    }]),
                }),
                ..Default::default()
            }]),
            destination: ApplicationDestination {
                server: Some("https://kubernetes.default.svc".into()),
                namespace: Some("guestbook".into()),
                name: None,
            },
            sync_policy: Some(SyncPolicy {
                automated: Some(SyncPolicyAutomated {
                    prune: Some(true),
                    self_heal: Some(true),
                    allow_empty: Some(true),
                }),
                sync_options: Some(vec!["CreateNamespace=true".into()]),
                retry: Some(RetryStrategy {
                    limit: Some(5),
                    backoff: Some(Backoff {
                        duration: Some("5s".into()),
                        factor: Some(2),
                        max_duration: Some("3m".into()),
                    }),
                }),
                managed_namespace_metadata: Some(ManagedNamespaceMetadata {
                    labels: Some(BTreeMap::from([("env".into(), "prod".into())])),
                    annotations: Some(BTreeMap::from([("owner".into(), "a".into())])),
                }),
            }),
            ignore_differences: Some(vec![ResourceIgnoreDifferences {
                group: Some("apps".into()),
                kind: "Deployment".into(),
                name: Some("guestbook".into()),
                namespace: Some("guestbook".into()),
                json_pointers: Some(vec!["/spec/replicas".into()]),
                jq_path_expressions: Some(vec![".spec.template".into()]),
                managed_fields_managers: Some(vec!["kube-controller-manager".into()]),
            }]),
            info: Some(vec![Info {
                name: "docs".into(),
                value: "https://example.com".into(),
            }]),
            revision_history_limit: Some(10),
        }
    }

    #[test]
    fn round_trip_preserves_set_fields() {
        let spec = full_spec();
        assert_eq!(spec_from_wire(&spec_to_wire(&spec)), spec);
    }

    #[test]
    fn unset_fields_become_zero_values() {
        let wire = spec_to_wire(&ApplicationSpecParameters::default());
        assert_eq!(wire, argo::ApplicationSpec::default());
        assert_eq!(spec_from_wire(&wire), ApplicationSpecParameters::default());
    }

    #[test]
    fn wire_json_uses_argocd_field_names() {
        let wire = spec_to_wire(&ApplicationSpecParameters {
            source: Some(ApplicationSource {
                repo_url: "https://github.com/org/repo.git".into(),
                path: Some("apps".into()),
                ..Default::default()
            }),
            revision_history_limit: Some(3),
            ..Default::default()
        });
        assert_json_diff::assert_json_eq!(
            serde_json::to_value(&wire).unwrap(),
            serde_json::json!({
                "source": {"repoURL": "https://github.com/org/repo.git", "path": "apps"},
                "destination": {},
                "project": "",
                "revisionHistoryLimit": "3"
            })
        );
    }

    #[test]
    fn missing_status_gives_default_observation() {
        assert_eq!(observation(None), ApplicationObservation::default());
    }

    #[test]
    fn observation_maps_status() {
        let status: argo::ApplicationStatus = serde_json::from_value(serde_json::json!({
            "sync": {"status": "Synced", "revision": "abc123"},
            "health": {"status": "Healthy"},
            "history": [{"id": "4", "revision": "abc123", "deployedAt": "2024-05-01T10:00:00Z"}],
            "operationState": {"phase": "Succeeded", "message": "successfully synced"},
            "resources": [{
                "version": "v1", "kind": "Service",
                "namespace": "guestbook", "name": "guestbook-ui",
                "status": "Synced", "health": {"status": "Healthy"}, "requiresPruning": true
            }],
            "sourceType": "Helm",
            "summary": {"images": ["gcr.io/heptio-images/ks-guestbook-demo:0.2"]}
        }))
        .unwrap();

        let observed = observation(Some(&status));
        assert_eq!(observed.sync.unwrap().revision.as_deref(), Some("abc123"));
        assert_eq!(observed.health.unwrap().status, "Healthy");
        assert_eq!(observed.history[0].id, 4);
        assert_eq!(observed.operation_state.unwrap().phase, "Succeeded");
        assert!(observed.resources[0].requires_pruning);
        assert_eq!(observed.resources[0].group, None);
        assert_eq!(observed.source_type.as_deref(), Some("Helm"));
        assert_eq!(observed.summary.unwrap().images.len(), 1);
    }
}
