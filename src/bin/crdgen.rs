use kube::CustomResourceExt;

use argocd_operator::resources::{
    applications::Application, applicationsets::ApplicationSet, clusters::Cluster,
    projects::Project, repositories::Repository, tokens::Token,
};

/// Print every CRD as a multi-document YAML stream, ready for `kubectl apply -f -`
fn main() -> anyhow::Result<()> {
    for crd in [
        Application::crd(),
        ApplicationSet::crd(),
        Project::crd(),
        Repository::crd(),
        Cluster::crd(),
        Token::crd(),
    ] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
