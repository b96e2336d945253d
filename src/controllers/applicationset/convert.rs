use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::argocd::applicationsets as argo;
use crate::controllers::application::convert::{
    spec_from_wire as application_spec_from_wire, spec_to_wire as application_spec_to_wire,
};
use crate::engine::compare::{non_empty, non_empty_list, non_empty_map, non_false};
use crate::resources::applicationsets::*;

pub fn spec_to_wire(params: &ApplicationSetParameters) -> argo::ApplicationSetSpec {
    argo::ApplicationSetSpec {
        go_template: params.go_template.unwrap_or_default(),
        go_template_options: params.go_template_options.clone().unwrap_or_default(),
        generators: params.generators.iter().map(generator_to_wire).collect(),
        template: template_to_wire(&params.template),
        sync_policy: params.sync_policy.as_ref().map(sync_policy_to_wire),
        strategy: params.strategy.clone(),
        preserved_fields: params
            .preserved_fields
            .as_ref()
            .map(|p| argo::ApplicationPreservedFields {
                annotations: p.annotations.clone().unwrap_or_default(),
                labels: p.labels.clone().unwrap_or_default(),
            }),
        ignore_application_differences: params
            .ignore_application_differences
            .iter()
            .flatten()
            .map(|d| argo::ApplicationSetResourceIgnoreDifferences {
                name: d.name.clone().unwrap_or_default(),
                json_pointers: d.json_pointers.clone().unwrap_or_default(),
                jq_path_expressions: d.jq_path_expressions.clone().unwrap_or_default(),
            })
            .collect(),
        template_patch: params.template_patch.clone(),
    }
}

/// `appNamespace` is part of the object's identity, not its spec, and stays unset
pub fn spec_from_wire(spec: &argo::ApplicationSetSpec) -> ApplicationSetParameters {
    ApplicationSetParameters {
        app_namespace: None,
        go_template: non_false(spec.go_template),
        go_template_options: go_template_options_from_wire(spec),
        generators: spec.generators.iter().map(generator_from_wire).collect(),
        template: template_from_wire(&spec.template),
        sync_policy: spec.sync_policy.as_ref().map(sync_policy_from_wire),
        strategy: spec.strategy.clone(),
        preserved_fields: spec
            .preserved_fields
            .as_ref()
            .map(|p| ApplicationPreservedFields {
                annotations: non_empty_list(&p.annotations),
                labels: non_empty_list(&p.labels),
            }),
        ignore_application_differences: non_empty_list(&spec.ignore_application_differences)
            .map(|differences| {
                differences
                    .iter()
                    .map(|d| ApplicationSetResourceIgnoreDifferences {
                        name: non_empty(&d.name),
                        json_pointers: non_empty_list(&d.json_pointers),
                        jq_path_expressions: non_empty_list(&d.jq_path_expressions),
                    })
                    .collect()
            }),
        template_patch: spec.template_patch.clone(),
    }
}

pub(super) fn sync_policy_to_wire(
    policy: &ApplicationSetSyncPolicy,
) -> argo::ApplicationSetSyncPolicy {
    argo::ApplicationSetSyncPolicy {
        preserve_resources_on_deletion: policy.preserve_resources_on_deletion.unwrap_or_default(),
        applications_sync: policy.applications_sync.map(|p| p.as_str().to_string()),
    }
}

pub(super) fn sync_policy_from_wire(
    policy: &argo::ApplicationSetSyncPolicy,
) -> ApplicationSetSyncPolicy {
    ApplicationSetSyncPolicy {
        preserve_resources_on_deletion: non_false(policy.preserve_resources_on_deletion),
        applications_sync: policy
            .applications_sync
            .as_deref()
            .and_then(ApplicationsSyncPolicy::parse),
    }
}

fn go_template_options_from_wire(spec: &argo::ApplicationSetSpec) -> Option<Vec<String>> {
    non_empty_list(&spec.go_template_options)
}

fn generator_to_wire(generator: &ApplicationSetGenerator) -> argo::ApplicationSetGenerator {
    argo::ApplicationSetGenerator {
        list: generator.list.as_ref().map(|l| argo::ListGenerator {
            elements: l.elements.clone(),
            elements_yaml: l.elements_yaml.clone(),
            template: l.template.as_ref().map(template_to_wire),
        }),
        clusters: generator.clusters.as_ref().map(|c| argo::ClusterGenerator {
            selector: c.selector.as_ref().map(selector_to_wire),
            template: c.template.as_ref().map(template_to_wire),
            values: c.values.clone().unwrap_or_default(),
        }),
        git: generator.git.as_ref().map(|g| argo::GitGenerator {
            repo_url: g.repo_url.clone(),
            revision: g.revision.clone(),
            directories: g
                .directories
                .iter()
                .flatten()
                .map(|d| argo::GitDirectoryGeneratorItem {
                    path: d.path.clone(),
                    exclude: d.exclude.unwrap_or_default(),
                })
                .collect(),
            files: g
                .files
                .iter()
                .flatten()
                .map(|f| argo::GitFileGeneratorItem {
                    path: f.path.clone(),
                })
                .collect(),
            requeue_after_seconds: g.requeue_after_seconds,
            template: g.template.as_ref().map(template_to_wire),
            path_param_prefix: g.path_param_prefix.clone().unwrap_or_default(),
        }),
        matrix: generator.matrix.clone(),
        merge: generator.merge.clone(),
        scm_provider: generator.scm_provider.clone(),
        pull_request: generator.pull_request.clone(),
        plugin: generator.plugin.clone(),
        selector: generator.selector.as_ref().map(selector_to_wire),
    }
}

fn generator_from_wire(generator: &argo::ApplicationSetGenerator) -> ApplicationSetGenerator {
    ApplicationSetGenerator {
        list: generator.list.as_ref().map(|l| ListGenerator {
            elements: l.elements.clone(),
            elements_yaml: l.elements_yaml.clone(),
            template: l.template.as_ref().map(template_from_wire),
        }),
        clusters: generator.clusters.as_ref().map(|c| ClusterGenerator {
            selector: c.selector.as_ref().map(selector_from_wire),
            template: c.template.as_ref().map(template_from_wire),
            values: non_empty_map(&c.values),
        }),
        git: generator.git.as_ref().map(|g| GitGenerator {
            repo_url: g.repo_url.clone(),
            revision: g.revision.clone(),
            directories: non_empty_list(&g.directories).map(|directories| {
                directories
                    .iter()
                    .map(|d| GitDirectoryGeneratorItem {
                        path: d.path.clone(),
                        exclude: non_false(d.exclude),
                    })
                    .collect()
            }),
            files: non_empty_list(&g.files).map(|files| {
                files
                    .iter()
                    .map(|f| GitFileGeneratorItem {
                        path: f.path.clone(),
                    })
                    .collect()
            }),
            requeue_after_seconds: g.requeue_after_seconds,
            template: g.template.as_ref().map(template_from_wire),
            path_param_prefix: non_empty(&g.path_param_prefix),
        }),
        matrix: generator.matrix.clone(),
        merge: generator.merge.clone(),
        scm_provider: generator.scm_provider.clone(),
        pull_request: generator.pull_request.clone(),
        plugin: generator.plugin.clone(),
        selector: generator.selector.as_ref().map(selector_from_wire),
    }
}

pub(super) fn selector_to_wire(selector: &LabelSelector) -> argo::LabelSelector {
    argo::LabelSelector {
        match_labels: selector.match_labels.clone().unwrap_or_default(),
        match_expressions: selector
            .match_expressions
            .iter()
            .flatten()
            .map(|e| argo::LabelSelectorRequirement {
                key: e.key.clone(),
                operator: e.operator.clone(),
                values: e.values.clone().unwrap_or_default(),
            })
            .collect(),
    }
}

fn selector_from_wire(selector: &argo::LabelSelector) -> LabelSelector {
    LabelSelector {
        match_labels: non_empty_map(&selector.match_labels),
        match_expressions: non_empty_list(&selector.match_expressions).map(|expressions| {
            expressions
                .iter()
                .map(|e| LabelSelectorRequirement {
                    key: e.key.clone(),
                    operator: e.operator.clone(),
                    values: non_empty_list(&e.values),
                })
                .collect()
        }),
    }
}

pub(super) fn template_to_wire(
    template: &ApplicationSetTemplate,
) -> argo::ApplicationSetTemplate {
    let meta = &template.metadata;
    argo::ApplicationSetTemplate {
        metadata: argo::ApplicationSetTemplateMeta {
            name: meta.name.clone(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            finalizers: meta.finalizers.clone().unwrap_or_default(),
        },
        spec: application_spec_to_wire(&template.spec),
    }
}

fn template_from_wire(template: &argo::ApplicationSetTemplate) -> ApplicationSetTemplate {
    let meta = &template.metadata;
    ApplicationSetTemplate {
        metadata: ApplicationSetTemplateMeta {
            name: meta.name.clone(),
            namespace: non_empty(&meta.namespace),
            labels: non_empty_map(&meta.labels),
            annotations: non_empty_map(&meta.annotations),
            finalizers: non_empty_list(&meta.finalizers),
        },
        spec: application_spec_from_wire(&template.spec),
    }
}

pub fn observation(status: Option<&argo::ApplicationSetStatus>) -> ApplicationSetObservation {
    let Some(status) = status else {
        return ApplicationSetObservation::default();
    };
    ApplicationSetObservation {
        conditions: status
            .conditions
            .iter()
            .map(|c| ApplicationSetCondition {
                r#type: c.type_.clone(),
                status: c.status.clone(),
                reason: non_empty(&c.reason),
                message: non_empty(&c.message),
            })
            .collect(),
        resources: status
            .resources
            .iter()
            .map(|r| ApplicationSetResourceStatus {
                name: r.name.clone(),
                namespace: non_empty(&r.namespace),
                status: non_empty(&r.status),
                health: r
                    .health
                    .as_ref()
                    .and_then(|h| non_empty(&h.status)),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::controllers::application::convert::tests::full_spec;

    fn template() -> ApplicationSetTemplate {
        ApplicationSetTemplate {
            metadata: ApplicationSetTemplateMeta {
                name: "{{cluster}}-guestbook".into(),
                namespace: Some("argocd".into()),
                labels: Some(BTreeMap::from([("team".into(), "a".into())])),
                annotations: None,
                finalizers: Some(vec!["resources-finalizer.argocd.argoproj.io".into()]),
            },
            spec: full_spec(),
        }
    }

    #[test]
    fn round_trip_preserves_set_fields() {
        let params = ApplicationSetParameters {
            app_namespace: None,
            go_template: Some(true),
            go_template_options: Some(vec!["missingkey=error".into()]),
            generators: vec![
                ApplicationSetGenerator {
                    list: Some(ListGenerator {
                        elements: vec![json!({"cluster": "prod"})],
                        elements_yaml: None,
                        template: None,
                    }),
                    ..Default::default()
                },
                ApplicationSetGenerator {
                    clusters: Some(ClusterGenerator {
                        selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([("env".into(), "prod".into())])),
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: "tier".into(),
                                operator: "In".into(),
                                values: Some(vec!["web".into()]),
                            }]),
                        }),
                        template: Some(template()),
                        values: Some(BTreeMap::from([("region".into(), "eu".into())])),
                    }),
                    ..Default::default()
                },
                ApplicationSetGenerator {
                    git: Some(GitGenerator {
                        repo_url: "https://github.com/example/apps".into(),
                        revision: "HEAD".into(),
                        directories: Some(vec![GitDirectoryGeneratorItem {
                            path: "apps/*".into(),
                            exclude: Some(true),
                        }]),
                        files: Some(vec![GitFileGeneratorItem {
                            path: "config.json".into(),
                        }]),
                        requeue_after_seconds: Some(180),
                        template: None,
                        path_param_prefix: Some("app".into()),
                    }),
                    ..Default::default()
                },
                ApplicationSetGenerator {
                    matrix: Some(json!({"generators": [{"list": {"elements": []}}]})),
                    ..Default::default()
                },
            ],
            template: template(),
            sync_policy: Some(ApplicationSetSyncPolicy {
                preserve_resources_on_deletion: Some(true),
                applications_sync: Some(ApplicationsSyncPolicy::CreateUpdate),
            }),
            strategy: Some(json!({"type": "RollingSync"})),
            preserved_fields: Some(ApplicationPreservedFields {
                annotations: Some(vec!["notes".into()]),
                labels: None,
            }),
            ignore_application_differences: Some(vec![ApplicationSetResourceIgnoreDifferences {
                name: Some("guestbook".into()),
                json_pointers: Some(vec!["/spec/source/targetRevision".into()]),
                jq_path_expressions: None,
            }]),
            template_patch: Some("spec: {}".into()),
        };

        assert_eq!(spec_from_wire(&spec_to_wire(&params)), params);
    }

    #[test]
    fn empty_wire_spec_gives_unset_parameters() {
        let params = spec_from_wire(&argo::ApplicationSetSpec::default());
        assert_eq!(params.go_template, None);
        assert_eq!(params.sync_policy, None);
        assert_eq!(params.ignore_application_differences, None);
        assert!(params.generators.is_empty());
    }
}
