use crate::argocd::applications as argo;
use crate::engine::compare::{
    late_init, matches, matches_list, matches_map, matches_nested, matches_str,
};
use crate::resources::applications::*;

use super::convert;

/// Whether every field the user set matches what ArgoCD holds
pub fn is_up_to_date(
    desired: &ApplicationSpecParameters,
    observed: &argo::ApplicationSpec,
) -> bool {
    matches_str(&desired.project, &observed.project)
        && matches_nested(&desired.source, observed.source.as_ref(), source_matches)
        && matches_list(&desired.sources, &observed.sources, source_matches)
        && destination_matches(&desired.destination, &observed.destination)
        && matches_nested(
            &desired.sync_policy,
            observed.sync_policy.as_ref(),
            sync_policy_matches,
        )
        && matches_list(
            &desired.ignore_differences,
            &observed.ignore_differences,
            ignore_differences_match,
        )
        && matches_list(&desired.info, &observed.info, |d, o| {
            d.name == o.name && d.value == o.value
        })
        && desired
            .revision_history_limit
            .is_none_or(|d| observed.revision_history_limit == Some(d))
}

/// Fill unset fields ArgoCD defaults on its side
pub fn late_initialize(desired: &mut ApplicationSpecParameters, observed: &argo::ApplicationSpec) {
    late_init(
        &mut desired.project,
        crate::engine::compare::non_empty(&observed.project),
    );
    late_init(
        &mut desired.revision_history_limit,
        observed.revision_history_limit,
    );
    late_init(
        &mut desired.sync_policy,
        observed
            .sync_policy
            .as_ref()
            .map(convert::sync_policy_from_wire),
    );
    late_init(&mut desired.info, convert::info_from_wire(&observed.info));
}

fn destination_matches(d: &ApplicationDestination, o: &argo::ApplicationDestination) -> bool {
    matches_str(&d.server, &o.server)
        && matches_str(&d.namespace, &o.namespace)
        && matches_str(&d.name, &o.name)
}

fn source_matches(d: &ApplicationSource, o: &argo::ApplicationSource) -> bool {
    d.repo_url == o.repo_url
        && matches_str(&d.path, &o.path)
        && matches_str(&d.target_revision, &o.target_revision)
        && matches_str(&d.chart, &o.chart)
        && matches_str(&d.r#ref, &o.r#ref)
        && matches_str(&d.name, &o.name)
        && matches_nested(&d.helm, o.helm.as_ref(), helm_matches)
        && matches_nested(&d.kustomize, o.kustomize.as_ref(), kustomize_matches)
        && matches_nested(&d.directory, o.directory.as_ref(), |d, o| {
            matches(&d.recurse, &o.recurse)
                && matches_str(&d.include, &o.include)
                && matches_str(&d.exclude, &o.exclude)
        })
        && matches_nested(&d.plugin, o.plugin.as_ref(), |d, o| {
            matches_str(&d.name, &o.name)
                && matches_list(&d.env, &o.env, |d, o| d.name == o.name && d.value == o.value)
        })
}

fn helm_matches(d: &ApplicationSourceHelm, o: &argo::ApplicationSourceHelm) -> bool {
    matches_list(&d.value_files, &o.value_files, |d, o| d == o)
        && matches_str(&d.values, &o.values)
        && matches_list(&d.parameters, &o.parameters, |d, o| {
            d.name == o.name && d.value == o.value && matches(&d.force_string, &o.force_string)
        })
        && matches_str(&d.release_name, &o.release_name)
        && matches(&d.pass_credentials, &o.pass_credentials)
        && matches(&d.skip_crds, &o.skip_crds)
        && matches_str(&d.version, &o.version)
}

fn kustomize_matches(d: &ApplicationSourceKustomize, o: &argo::ApplicationSourceKustomize) -> bool {
    matches_str(&d.name_prefix, &o.name_prefix)
        && matches_str(&d.name_suffix, &o.name_suffix)
        && matches_list(&d.images, &o.images, |d, o| d == o)
        && matches_map(&d.common_labels, &o.common_labels)
        && matches_map(&d.common_annotations, &o.common_annotations)
        && matches_str(&d.version, &o.version)
        && matches_str(&d.namespace, &o.namespace)
}

pub(crate) fn sync_policy_matches(d: &SyncPolicy, o: &argo::SyncPolicy) -> bool {
    matches_nested(&d.automated, o.automated.as_ref(), |d, o| {
        matches(&d.prune, &o.prune)
            && matches(&d.self_heal, &o.self_heal)
            && matches(&d.allow_empty, &o.allow_empty)
    }) && matches_list(&d.sync_options, &o.sync_options, |d, o| d == o)
        && matches_nested(&d.retry, o.retry.as_ref(), |d, o| {
            matches(&d.limit, &o.limit)
                && matches_nested(&d.backoff, o.backoff.as_ref(), |d, o| {
                    matches_str(&d.duration, &o.duration)
                        && d.factor.is_none_or(|f| o.factor == Some(f))
                        && matches_str(&d.max_duration, &o.max_duration)
                })
        })
        && matches_nested(
            &d.managed_namespace_metadata,
            o.managed_namespace_metadata.as_ref(),
            |d, o| matches_map(&d.labels, &o.labels) && matches_map(&d.annotations, &o.annotations),
        )
}

fn ignore_differences_match(
    d: &ResourceIgnoreDifferences,
    o: &argo::ResourceIgnoreDifferences,
) -> bool {
    d.kind == o.kind
        && matches_str(&d.group, &o.group)
        && matches_str(&d.name, &o.name)
        && matches_str(&d.namespace, &o.namespace)
        && matches_list(&d.json_pointers, &o.json_pointers, |d, o| d == o)
        && matches_list(&d.jq_path_expressions, &o.jq_path_expressions, |d, o| d == o)
        && matches_list(
            &d.managed_fields_managers,
            &o.managed_fields_managers,
            |d, o| d == o,
        )
}
