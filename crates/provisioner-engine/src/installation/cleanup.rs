// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Removal of service catalog instances created through the Service Manager.
//!
//! Instances provisioned by Service Manager brokers hold cloud resources that
//! outlive the cluster, so they are deleted before the cluster goes away.
//! Service catalog indexes classes and instances by the SHA-224 of the
//! referenced name, which is what the label selectors below match on.

use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use kube::core::ApiResource;
use kube::{Client, ResourceExt};
use sha2::{Digest, Sha224};
use tracing::{debug, info};

use super::InstallationError;

/// URL prefix of brokers backed by the Service Manager.
pub const SERVICE_MANAGER_BROKER_PREFIX: &str = "https://service-manager.";

const BROKER_NAME_LABEL: &str = "servicecatalog.k8s.io/spec.clusterServiceBrokerName";
const CLASS_REF_NAME_LABEL: &str = "servicecatalog.k8s.io/spec.clusterServiceClassRef.name";

fn service_catalog_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: "servicecatalog.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "servicecatalog.k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Hex SHA-224 digest used by service catalog in label values.
pub(crate) fn label_hash(name: &str) -> String {
    format!("{:x}", Sha224::digest(name.as_bytes()))
}

pub(crate) fn label_selector(label: &str, name: &str) -> String {
    format!("{}={}", label, label_hash(name))
}

/// Names of the brokers whose URL starts with `url_prefix`.
pub(crate) fn matching_brokers(brokers: &[DynamicObject], url_prefix: &str) -> Vec<String> {
    brokers
        .iter()
        .filter(|broker| {
            broker.data["spec"]["url"]
                .as_str()
                .is_some_and(|url| url.starts_with(url_prefix))
        })
        .map(|broker| broker.name_any())
        .collect()
}

fn list_error(resource: &str, e: kube::Error) -> InstallationError {
    InstallationError::Api(format!("listing {}: {}", resource, e))
}

/// Delete every service instance of a class offered by a broker matching
/// `url_prefix`.
pub(crate) async fn delete_service_instances(
    client: &Client,
    url_prefix: &str,
) -> Result<usize, InstallationError> {
    let brokers: Api<DynamicObject> = Api::all_with(
        client.clone(),
        &service_catalog_resource("ClusterServiceBroker", "clusterservicebrokers"),
    );
    let classes: Api<DynamicObject> = Api::all_with(
        client.clone(),
        &service_catalog_resource("ClusterServiceClass", "clusterserviceclasses"),
    );
    let instance_resource = service_catalog_resource("ServiceInstance", "serviceinstances");
    let instances: Api<DynamicObject> = Api::all_with(client.clone(), &instance_resource);

    let broker_list = brokers
        .list(&ListParams::default())
        .await
        .map_err(|e| list_error("clusterservicebrokers", e))?;
    let broker_names = matching_brokers(&broker_list.items, url_prefix);

    let mut deleted = 0;
    for broker in &broker_names {
        let selector = label_selector(BROKER_NAME_LABEL, broker);
        let class_list = classes
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| list_error("clusterserviceclasses", e))?;

        for class in &class_list.items {
            let selector = label_selector(CLASS_REF_NAME_LABEL, &class.name_any());
            let instance_list = instances
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(|e| list_error("serviceinstances", e))?;

            for instance in &instance_list.items {
                let namespace = instance.namespace().unwrap_or_default();
                let name = instance.name_any();
                let api: Api<DynamicObject> =
                    Api::namespaced_with(client.clone(), &namespace, &instance_resource);
                match api.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) => {
                        return Err(InstallationError::Api(format!(
                            "deleting service instance {}/{}: {}",
                            namespace, name, e
                        )));
                    }
                }
                debug!(namespace = %namespace, name = %name, "Service instance deleted");
                deleted += 1;
            }
        }
    }

    info!(
        brokers = broker_names.len(),
        instances = deleted,
        "Service catalog cleanup finished"
    );
    Ok(deleted)
}
