//! The aggregated, namespaced view of every upstream's tools, resources,
//! and prompts, plus the resolver from public names back to
//! `(upstream, native name)`.
//!
//! Public names are computed per upstream: the configured `tool_prefix` when
//! one exists, the bare native name otherwise. Names that would collide
//! across upstreams all fall back to `{upstream}_{native}`; anything still
//! colliding after that is recorded as an error and the later upstream's
//! item (ordered by upstream name) is omitted, so a snapshot never contains
//! a duplicate public name.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use rmcp::model::Prompt;
use rmcp::model::Resource;
use rmcp::model::Tool;
use sha1::Digest;
use sha1::Sha1;
use tracing::warn;

/// Public names must satisfy `^[a-zA-Z0-9_-]+$` and fit in 64 characters,
/// the strictest constraints among common MCP clients.
const MAX_PUBLIC_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Tool,
    Resource,
    Prompt,
}

impl CatalogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Tool => "tool",
            CatalogKind::Resource => "resource",
            CatalogKind::Prompt => "prompt",
        }
    }
}

/// Typed payload of one catalog entry. Schemas and URIs are forwarded as-is;
/// the gateway never validates them.
#[derive(Debug, Clone)]
pub enum CatalogDetail {
    Tool { tool: Tool },
    Resource { resource: Resource },
    Prompt { prompt: Prompt },
}

impl CatalogDetail {
    pub fn kind(&self) -> CatalogKind {
        match self {
            CatalogDetail::Tool { .. } => CatalogKind::Tool,
            CatalogDetail::Resource { .. } => CatalogKind::Resource,
            CatalogDetail::Prompt { .. } => CatalogKind::Prompt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub public_name: String,
    pub upstream: String,
    pub native_name: String,
    pub description: Option<String>,
    pub detail: CatalogDetail,
}

/// Everything one running upstream exposes, as discovered by its service.
#[derive(Debug, Clone, Default)]
pub struct UpstreamCatalog {
    pub upstream: String,
    pub tool_prefix: Option<String>,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

/// Immutable aggregated snapshot. Readers hold an `Arc<Catalog>` and always
/// observe a consistent version.
#[derive(Debug, Default)]
pub struct Catalog {
    version: u64,
    items: HashMap<String, CatalogItem>,
    resource_uris: HashMap<String, String>,
    collision_errors: Vec<String>,
}

impl Catalog {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn build(version: u64, snapshots: &[UpstreamCatalog]) -> Arc<Self> {
        let mut ordered: Vec<&UpstreamCatalog> = snapshots.iter().collect();
        ordered.sort_by(|a, b| a.upstream.cmp(&b.upstream));

        let mut candidates: Vec<(String, CatalogItem)> = Vec::new();
        for snapshot in &ordered {
            for tool in &snapshot.tools {
                let native = tool.name.to_string();
                candidates.push((
                    primary_name(snapshot.tool_prefix.as_deref(), &native),
                    CatalogItem {
                        public_name: String::new(),
                        upstream: snapshot.upstream.clone(),
                        native_name: native,
                        description: tool.description.as_ref().map(ToString::to_string),
                        detail: CatalogDetail::Tool { tool: tool.clone() },
                    },
                ));
            }
            for resource in &snapshot.resources {
                let native = resource.name.to_string();
                candidates.push((
                    primary_name(snapshot.tool_prefix.as_deref(), &native),
                    CatalogItem {
                        public_name: String::new(),
                        upstream: snapshot.upstream.clone(),
                        native_name: native,
                        description: resource.description.as_ref().map(ToString::to_string),
                        detail: CatalogDetail::Resource {
                            resource: resource.clone(),
                        },
                    },
                ));
            }
            for prompt in &snapshot.prompts {
                let native = prompt.name.clone();
                candidates.push((
                    primary_name(snapshot.tool_prefix.as_deref(), &native),
                    CatalogItem {
                        public_name: String::new(),
                        upstream: snapshot.upstream.clone(),
                        native_name: native,
                        description: prompt.description.clone(),
                        detail: CatalogDetail::Prompt {
                            prompt: prompt.clone(),
                        },
                    },
                ));
            }
        }

        // First pass: primary candidates that are unique keep their name;
        // every member of a colliding group falls back to the qualified
        // `{upstream}_{native}` form.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (candidate, _) in &candidates {
            *counts.entry(candidate.as_str()).or_default() += 1;
        }
        let assignments: Vec<String> = candidates
            .iter()
            .map(|(candidate, item)| {
                if counts[candidate.as_str()] > 1 {
                    format!("{}_{}", item.upstream, item.native_name)
                } else {
                    candidate.clone()
                }
            })
            .collect();

        let mut catalog = Catalog {
            version,
            items: HashMap::new(),
            resource_uris: HashMap::new(),
            collision_errors: Vec::new(),
        };
        let mut used: HashSet<String> = HashSet::new();
        for ((_, mut item), assigned) in candidates.into_iter().zip(assignments) {
            let public_name = finalize_public_name(&assigned);
            if !used.insert(public_name.clone()) {
                let message = format!(
                    "public name `{public_name}` still collides after fallback; omitting {} `{}` from upstream `{}`",
                    item.detail.kind().as_str(),
                    item.native_name,
                    item.upstream,
                );
                warn!("{message}");
                catalog.collision_errors.push(message);
                continue;
            }

            if let CatalogDetail::Resource { resource } = &item.detail {
                catalog
                    .resource_uris
                    .entry(resource.uri.to_string())
                    .or_insert_with(|| public_name.clone());
            }
            item.public_name = public_name.clone();
            catalog.items.insert(public_name, item);
        }

        Arc::new(catalog)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn resolve(&self, public_name: &str) -> Option<&CatalogItem> {
        self.items.get(public_name)
    }

    /// Routes a `resources/read` by URI. When several upstreams expose the
    /// same URI the first by upstream-name order wins.
    pub fn resolve_resource_uri(&self, uri: &str) -> Option<&CatalogItem> {
        let public_name = self.resource_uris.get(uri)?;
        self.items.get(public_name)
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    pub fn tools(&self) -> Vec<&CatalogItem> {
        self.of_kind(CatalogKind::Tool)
    }

    pub fn resources(&self) -> Vec<&CatalogItem> {
        self.of_kind(CatalogKind::Resource)
    }

    pub fn prompts(&self) -> Vec<&CatalogItem> {
        self.of_kind(CatalogKind::Prompt)
    }

    pub fn collision_errors(&self) -> &[String] {
        &self.collision_errors
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn of_kind(&self, kind: CatalogKind) -> Vec<&CatalogItem> {
        let mut items: Vec<&CatalogItem> = self
            .items
            .values()
            .filter(|item| item.detail.kind() == kind)
            .collect();
        items.sort_by(|a, b| a.public_name.cmp(&b.public_name));
        items
    }
}

fn primary_name(tool_prefix: Option<&str>, native: &str) -> String {
    match tool_prefix {
        Some(prefix) => format!("{prefix}{native}"),
        None => native.to_string(),
    }
}

/// Sanitizes to the allowed character set, then caps the length by replacing
/// the tail with a hash of the raw name so distinct long names stay distinct.
fn finalize_public_name(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('_');
    }

    if sanitized.len() > MAX_PUBLIC_NAME_LENGTH {
        let mut hasher = Sha1::new();
        hasher.update(raw.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let prefix_len = MAX_PUBLIC_NAME_LENGTH - digest.len();
        sanitized = format!("{}{digest}", &sanitized[..prefix_len]);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use rmcp::model::JsonObject;
    use rmcp::model::Tool;

    use super::Catalog;
    use super::UpstreamCatalog;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string().into(),
            title: None,
            description: Some(format!("test tool {name}").into()),
            input_schema: Arc::new(JsonObject::default()),
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn snapshot(upstream: &str, prefix: Option<&str>, tools: &[&str]) -> UpstreamCatalog {
        UpstreamCatalog {
            upstream: upstream.to_string(),
            tool_prefix: prefix.map(str::to_string),
            tools: tools.iter().map(|name| tool(name)).collect(),
            resources: Vec::new(),
            prompts: Vec::new(),
        }
    }

    #[test]
    fn unique_names_pass_through_unprefixed() {
        let catalog = Catalog::build(
            1,
            &[snapshot("a", None, &["read"]), snapshot("b", None, &["write"])],
        );

        let read = catalog.resolve("read").unwrap();
        assert_eq!(read.upstream, "a");
        assert_eq!(read.native_name, "read");
        assert!(catalog.collision_errors().is_empty());
    }

    #[test]
    fn configured_prefix_applies() {
        let catalog = Catalog::build(1, &[snapshot("fs", Some("fs_"), &["read"])]);
        let item = catalog.resolve("fs_read").unwrap();
        assert_eq!((item.upstream.as_str(), item.native_name.as_str()), ("fs", "read"));
        assert!(catalog.resolve("read").is_none());
    }

    #[test]
    fn colliding_names_all_fall_back_to_qualified_form() {
        let catalog = Catalog::build(
            1,
            &[snapshot("A", None, &["list"]), snapshot("B", None, &["list"])],
        );

        let a = catalog.resolve("A_list").unwrap();
        assert_eq!((a.upstream.as_str(), a.native_name.as_str()), ("A", "list"));
        let b = catalog.resolve("B_list").unwrap();
        assert_eq!((b.upstream.as_str(), b.native_name.as_str()), ("B", "list"));
        assert!(catalog.resolve("list").is_none());
        assert!(catalog.collision_errors().is_empty());
    }

    #[test]
    fn residual_collisions_drop_the_later_upstream_deterministically() {
        // Upstream `a` natively exposes `b_list`, which is exactly what
        // upstream `b`'s colliding `list` falls back to.
        let catalog = Catalog::build(
            1,
            &[
                snapshot("a", None, &["b_list", "list"]),
                snapshot("b", None, &["list"]),
            ],
        );

        let survivor = catalog.resolve("b_list").unwrap();
        assert_eq!(survivor.upstream, "a");
        assert_eq!(catalog.resolve("a_list").unwrap().upstream, "a");
        assert_eq!(catalog.collision_errors().len(), 1);
        assert!(catalog.collision_errors()[0].contains("upstream `b`"));
    }

    #[test]
    fn public_names_are_unique_across_kinds_and_upstreams() {
        let snapshots = vec![
            snapshot("a", None, &["x", "y", "shared"]),
            snapshot("b", Some("b_"), &["x", "z"]),
            snapshot("c", None, &["shared"]),
        ];
        let catalog = Catalog::build(7, &snapshots);

        let mut seen = HashSet::new();
        for item in catalog.items() {
            assert!(seen.insert(item.public_name.clone()), "duplicate {}", item.public_name);
        }
        assert_eq!(catalog.version(), 7);
    }

    #[test]
    fn long_names_are_capped_with_a_stable_hash_suffix() {
        let long_a = "a".repeat(80);
        let long_b = format!("{}b", "a".repeat(79));
        let catalog = Catalog::build(
            1,
            &[snapshot("up", None, &[long_a.as_str(), long_b.as_str()])],
        );

        let names: Vec<String> = catalog
            .tools()
            .iter()
            .map(|item| item.public_name.clone())
            .collect();
        assert_eq!(names.len(), 2);
        for name in &names {
            assert_eq!(name.len(), 64);
        }
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn invalid_characters_are_sanitized() {
        let catalog = Catalog::build(1, &[snapshot("up", None, &["read.file"])]);
        let item = catalog.resolve("read_file").unwrap();
        // The public key is sanitized; the native name used on the wire to
        // the upstream is untouched.
        assert_eq!(item.native_name, "read.file");
    }
}
