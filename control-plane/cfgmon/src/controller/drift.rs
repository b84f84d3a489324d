//! Structural comparison of normalized pod templates.
//!
//! Two templates are equal when they have the same containers in the same
//! order, and each container pair agrees on name, image, pull policy, the
//! ordered port list and the ordered env list. Env lists that differ only in
//! order are different, matching how the workload's pod template is diffed.

use crate::crd::monitored_service::{ContainerTemplate, PodTemplate};

/// True when `fetched` should replace `current`. An empty `current` (first
/// reconcile) drifts toward any non-empty template.
pub fn has_drift(current: &PodTemplate, fetched: &PodTemplate) -> bool {
    if current.is_empty() {
        return !fetched.is_empty();
    }
    !templates_equal(current, fetched)
}

pub fn templates_equal(a: &PodTemplate, b: &PodTemplate) -> bool {
    a.containers.len() == b.containers.len()
        && a
            .containers
            .iter()
            .zip(&b.containers)
            .all(|(x, y)| containers_equal(x, y))
}

fn containers_equal(a: &ContainerTemplate, b: &ContainerTemplate) -> bool {
    a.name == b.name
        && a.image == b.image
        && a.image_pull_policy == b.image_pull_policy
        && a.ports == b.ports
        && a.env == b.env
}
