//! Image naming and commit links.

use crate::types::BuildJob;

/// Image references derived for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNames {
    /// Repository name without registry or tag.
    pub name: String,
    /// Reference tagged with the build id.
    pub tag: String,
    /// Reference tagged `latest`.
    pub latest: String,
}

/// Derive the image references for `job`.
///
/// Jobs without a registry token push to the cluster-local registry at
/// `local_registry_host`. Docker Hub repositories are namespaced by the
/// registry user.
pub fn image_names(job: &BuildJob, local_registry_host: &str) -> ImageNames {
    let mut name = format!("{}-{}", job.namespace.name, job.service.controller_name);

    let registry = job
        .project
        .registry
        .as_ref()
        .filter(|r| r.token.is_some());

    let host = match registry {
        None => local_registry_host,
        Some(registry) => {
            if registry.path == "docker.io" {
                if let Some(user) = &registry.user {
                    name = format!("{user}/{name}");
                }
            }
            registry.path.as_str()
        }
    };

    ImageNames {
        tag: format!("{host}/{name}:{}", job.build_id),
        latest: format!("{host}/{name}:latest"),
        name,
    }
}

/// Web link to `hash` in the repository at `repository`.
///
/// Credentials in the URL are dropped. Returns `None` unless the input has
/// the form `scheme://host/path`.
pub fn commit_link(repository: &str, hash: &str) -> Option<String> {
    if hash.is_empty() {
        return None;
    }
    let (scheme, rest) = repository.trim().split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }

    let (authority, path) = rest.split_once('/')?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if host.is_empty() || path.is_empty() {
        return None;
    }

    let base = format!("{scheme}://{host}/{path}");
    let link = if host.contains("github.com") {
        format!("{base}/commit/{hash}")
    } else if host.contains("dev.azure.com") {
        format!("{base}/_git/{path}/commit/{hash}")
    } else if host.contains("bitbucket.org") {
        format!("{base}/_git/{path}/commits/{hash}")
    } else {
        format!("{base}/-/commit/{hash}")
    };
    Some(link)
}
