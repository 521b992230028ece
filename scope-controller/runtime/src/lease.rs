use crate::{
    k8s::{self, ObjectMeta, OwnerReference, PostParams, Resource, ResourceExt},
    scheduler::Leadership,
};
use anyhow::{Context, Result};
use k8s_openapi::api::{apps::v1::Deployment, coordination::v1::Lease};
use tokio::time::Duration;
use tracing::{debug, info};

const NAME: &str = "scope-controller-write";
const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
const COMPONENT: &str = "scope-controller";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Ensures the write Lease exists and starts competing for it as `claimant`.
///
/// The Lease is owned by the controller's Deployment so that it is removed
/// along with the controller.
pub async fn acquire<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    claimant: String,
) -> Result<Leadership> {
    let deployment = k8s::Api::<Deployment>::namespaced(runtime.client(), ns)
        .get(deployment_name)
        .await
        .with_context(|| format!("failed to fetch deployment {ns}/{deployment_name}"))?;
    let owner = owner(&deployment)?;

    let api = k8s::Api::<Lease>::namespaced(runtime.client(), ns);
    match api.create(&PostParams::default(), &lease(ns, owner)).await {
        Ok(_) => info!(%ns, name = NAME, "Created Lease"),
        Err(k8s::Error::Api(rsp)) if rsp.code == 409 => {
            debug!(%ns, name = NAME, "Lease already exists")
        }
        Err(error) => return Err(error).context("failed to create Lease"),
    }

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, NAME)
        .await?
        .spawn(claimant.as_str(), params)
        .await?;
    Ok(Leadership::Lease { claims, claimant })
}

fn owner(deployment: &Deployment) -> Result<OwnerReference> {
    deployment
        .controller_owner_ref(&())
        .with_context(|| format!("deployment {} has no uid", deployment.name_any()))
}

/// An unclaimed Lease; the lease manager fills in the spec.
fn lease(ns: &str, owner: OwnerReference) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(ns.to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(
                Some((COMPONENT_LABEL.to_string(), COMPONENT.to_string()))
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}
