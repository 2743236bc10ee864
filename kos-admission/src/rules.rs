//! Built-in admission rules. Names are normative per the admission
//! pipeline's component design; each function rejects with `Error::Invalid`
//! carrying the rule's message.

use kos_core::kinds::pod::PodSpec;
use kos_core::kinds::service::{ServicePort, TargetPort};
use kos_core::kinds::volume::PersistentVolumeClaimSpec;
use kos_core::{quantity, Error};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DNS1123_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    // Conservative: registry[:port]/repo(/repo)*:tag-or-digest, all lowercase
    // segments. Matches "nginx", "nginx:1.0", "docker.io/library/nginx@sha256:...".
    static ref IMAGE_REF: Regex =
        Regex::new(r"^[a-z0-9]+([._-][a-z0-9]+)*(/[a-z0-9]+([._-][a-z0-9]+)*)*(:[\w][\w.-]{0,127}|@sha256:[a-f0-9]{64})?$").unwrap();
}

/// *NameDNS1123*: applies to Pod, Service, Deployment, StatefulSet, PVC.
pub fn name_dns1123(name: &str) -> Result<(), Error> {
    if name.len() > 253 {
        return Err(Error::Invalid(format!("name \"{name}\" exceeds 253 characters")));
    }
    if !DNS1123_LABEL.is_match(name) {
        return Err(Error::Invalid(format!(
            "name \"{name}\" is not a valid DNS-1123 label"
        )));
    }
    Ok(())
}

/// *PodResources*: every container's requests/limits must parse and be
/// positive if present.
pub fn pod_resources(spec: &PodSpec) -> Result<(), Error> {
    for c in &spec.containers {
        if let Some(cpu) = &c.resources.requests.cpu {
            quantity::require_positive_cpu(cpu)?;
        }
        if let Some(mem) = &c.resources.requests.memory {
            quantity::require_positive_memory(mem)?;
        }
        if let Some(cpu) = &c.resources.limits.cpu {
            quantity::require_positive_cpu(cpu)?;
        }
        if let Some(mem) = &c.resources.limits.memory {
            quantity::require_positive_memory(mem)?;
        }
    }
    Ok(())
}

/// *PodImage*: every container has a non-empty image matching the
/// conservative registry regex.
pub fn pod_image(spec: &PodSpec) -> Result<(), Error> {
    for c in &spec.containers {
        if c.image.is_empty() {
            return Err(Error::Invalid(format!("container \"{}\" has an empty image", c.name)));
        }
        if !IMAGE_REF.is_match(&c.image) {
            return Err(Error::Invalid(format!("container \"{}\" has an invalid image reference \"{}\"", c.name, c.image)));
        }
    }
    Ok(())
}

/// *ServicePorts*: port in [1,65535]; targetPort either an integer in range
/// or a string naming a container port (resolved later by the Endpoints
/// computation, not here).
pub fn service_ports(ports: &[ServicePort]) -> Result<(), Error> {
    for p in ports {
        if p.port == 0 {
            return Err(Error::Invalid(format!("port \"{}\" must be in [1,65535]", p.name)));
        }
        if let TargetPort::Number(n) = p.target_port {
            if n == 0 {
                return Err(Error::Invalid(format!("targetPort for port \"{}\" must be in [1,65535]", p.name)));
            }
        }
    }
    Ok(())
}

/// *DeploymentReplicas*: replicas >= 0 always holds for `u32`; this exists
/// to keep the rule named and callable uniformly alongside the others.
pub fn replicas_nonnegative(_replicas: u32) -> Result<(), Error> {
    Ok(())
}

/// *StatefulSetService*: `serviceName` must be a valid DNS label if present.
pub fn stateful_set_service_name(service_name: &str) -> Result<(), Error> {
    if service_name.is_empty() {
        return Ok(());
    }
    name_dns1123(service_name)
}

/// *PVCSize*: `resources.requests.storage` parses and is positive.
pub fn pvc_size(spec: &PersistentVolumeClaimSpec) -> Result<(), Error> {
    quantity::require_positive_memory(&spec.requests_storage)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns1123_accepts_lowercase_hyphenated() {
        assert!(name_dns1123("nginx-web-1").is_ok());
    }

    #[test]
    fn dns1123_rejects_uppercase_and_underscores() {
        assert!(name_dns1123("Nginx").is_err());
        assert!(name_dns1123("nginx_web").is_err());
    }

    #[test]
    fn image_ref_accepts_tagged_and_digest_forms() {
        assert!(pod_image_of("nginx:1.0").is_ok());
        assert!(pod_image_of("docker.io/library/nginx").is_ok());
        assert!(pod_image_of("registry.local/team/app@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_ok());
    }

    #[test]
    fn image_ref_rejects_empty_and_uppercase() {
        assert!(pod_image_of("").is_err());
        assert!(pod_image_of("NGINX").is_err());
    }

    fn pod_image_of(image: &str) -> Result<(), Error> {
        use kos_core::kinds::pod::{Container, ResourceRequirements};
        let spec = PodSpec {
            containers: vec![Container {
                name: "c".into(),
                image: image.into(),
                command: vec![],
                env: Default::default(),
                ports: vec![],
                volume_mounts: vec![],
                resources: ResourceRequirements::default(),
            }],
            ..Default::default()
        };
        pod_image(&spec)
    }
}
