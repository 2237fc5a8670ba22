use std::collections::HashSet;

use super::{Target, TargetKind};
use crate::error::AuditError;
use crate::registry::{PageEntry, Registry};

/// Replace every `/` and `:` with `-` so a path can be embedded in a test id.
fn sanitize(path: &str) -> String {
    path.replace(['/', ':'], "-")
}

pub fn page_test_id(path: &str) -> String {
    format!("page-{}", sanitize(path))
}

pub fn service_test_id(endpoint: &str) -> String {
    format!("service-{}", sanitize(endpoint))
}

pub fn api_test_id(method: &str, endpoint: &str) -> String {
    format!("api-{}-{}", method.to_lowercase(), sanitize(endpoint))
}

fn page_target(page: &PageEntry) -> Target {
    let mut target = Target::discovered(
        page_test_id(&page.path),
        TargetKind::Page,
        &page.name,
        &page.name_ar,
        &page.path,
    );
    target.required_role = page.required_role.clone();
    target
}

fn service_targets<'a>(page: &'a PageEntry) -> impl Iterator<Item = Target> + 'a {
    let parent_test_id = page_test_id(&page.path);
    page.api_endpoints.iter().map(move |endpoint| {
        let mut target = Target::discovered(
            service_test_id(endpoint),
            TargetKind::Service,
            &format!("{} service {}", page.name, endpoint),
            &format!("خدمة {} {}", page.name_ar, endpoint),
            &page.path,
        );
        target.api_endpoint = Some(endpoint.clone());
        target.api_method = Some("GET".to_string());
        target.parent_test_id = Some(parent_test_id.clone());
        target.required_role = page.required_role.clone();
        target
    })
}

/// Keep the first occurrence of each test id. A service endpoint shared by
/// several pages is owned by the first page that declares it.
fn dedup(targets: impl IntoIterator<Item = Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.test_id.clone()))
        .collect()
}

/// Every page, every declared service dependency, and every raw API endpoint.
pub fn discover_all(registry: &Registry) -> Vec<Target> {
    let pages = registry
        .pages
        .iter()
        .flat_map(|page| std::iter::once(page_target(page)).chain(service_targets(page)));

    let apis = registry.apis.iter().map(|api| {
        let mut target = Target::discovered(
            api_test_id(&api.method, &api.endpoint),
            TargetKind::Api,
            &api.name,
            &api.name_ar,
            &api.endpoint,
        );
        target.api_endpoint = Some(api.endpoint.clone());
        target.api_method = Some(api.method.clone());
        target
    });

    dedup(pages.chain(apis))
}

/// One page and its service dependants.
pub fn discover_page(registry: &Registry, page_path: &str) -> Result<Vec<Target>, AuditError> {
    let page = registry
        .find_page(page_path)
        .ok_or_else(|| AuditError::PageNotFound(page_path.to_string()))?;
    Ok(dedup(std::iter::once(page_target(page)).chain(service_targets(page))))
}
