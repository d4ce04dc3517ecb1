//! Per-server capability cache.
//!
//! Holds the tools and resources discovered on each connected server.
//! Entries are replaced or dropped wholesale per server; callers get cloned
//! snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meshmate_core::{CoreError, ResourceContent, ResourceDescriptor, ToolDescriptor, ToolSchema};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct ServerCapabilities {
    tools: Vec<ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
}

/// Discovered capabilities, keyed by server name.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    servers: RwLock<BTreeMap<String, ServerCapabilities>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `server`.
    pub async fn replace(
        &self,
        server: &str,
        tools: Vec<ToolDescriptor>,
        resources: Vec<ResourceDescriptor>,
    ) {
        self.servers
            .write()
            .await
            .insert(server.to_string(), ServerCapabilities { tools, resources });
    }

    /// Forget everything known about `server`.
    pub async fn invalidate(&self, server: &str) {
        if self.servers.write().await.remove(server).is_some() {
            tracing::debug!(server = %server, "Capability cache invalidated");
        }
    }

    /// All tools, ordered by server then discovery order.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.servers
            .read()
            .await
            .values()
            .flat_map(|caps| caps.tools.iter().cloned())
            .collect()
    }

    /// All resources, ordered by server then discovery order.
    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.servers
            .read()
            .await
            .values()
            .flat_map(|caps| caps.resources.iter().cloned())
            .collect()
    }

    pub async fn tools_for(&self, server: &str) -> Vec<ToolDescriptor> {
        self.servers
            .read()
            .await
            .get(server)
            .map(|caps| caps.tools.clone())
            .unwrap_or_default()
    }

    /// `(tools, resources)` counts for `server`.
    pub async fn counts(&self, server: &str) -> (usize, usize) {
        self.servers
            .read()
            .await
            .get(server)
            .map_or((0, 0), |caps| (caps.tools.len(), caps.resources.len()))
    }

    /// Schemas for every cached tool, for a completion provider.
    pub async fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.list_tools()
            .await
            .iter()
            .map(ToolDescriptor::to_schema)
            .collect()
    }

    /// Look up a tool by qualified name, or by bare name when exactly one
    /// server has a tool of that name.
    pub async fn find_tool(&self, name: &str) -> Result<ToolDescriptor, CoreError> {
        let servers = self.servers.read().await;
        let all = || servers.values().flat_map(|caps| caps.tools.iter());

        if let Some(tool) = all().find(|t| t.qualified_name() == name) {
            return Ok(tool.clone());
        }

        let bare: Vec<&ToolDescriptor> = all().filter(|t| t.name == name).collect();
        match bare.as_slice() {
            [tool] => Ok((*tool).clone()),
            [] => Err(CoreError::UnknownTool(name.to_string())),
            many => Err(CoreError::UnknownTool(format!(
                "{name} (ambiguous between {})",
                many.iter()
                    .map(|t| t.qualified_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// The resource advertised under `uri`, with any cached content.
    pub async fn find_resource(&self, uri: &str) -> Option<ResourceDescriptor> {
        self.servers
            .read()
            .await
            .values()
            .flat_map(|caps| caps.resources.iter())
            .find(|r| r.uri == uri)
            .cloned()
    }

    /// Attach fetched content to a resource. Returns the updated descriptor,
    /// or `None` if the server no longer advertises it.
    pub async fn store_content(
        &self,
        server: &str,
        uri: &str,
        content: ResourceContent,
        fetched_at: DateTime<Utc>,
    ) -> Option<ResourceDescriptor> {
        let mut servers = self.servers.write().await;
        let resource = servers
            .get_mut(server)?
            .resources
            .iter_mut()
            .find(|r| r.uri == uri)?;
        resource.content = Some(content);
        resource.fetched_at = Some(fetched_at);
        Some(resource.clone())
    }

    /// Drop cached content for `uri`. Returns whether anything was evicted.
    pub async fn evict_content(&self, uri: &str) -> bool {
        let mut servers = self.servers.write().await;
        let mut evicted = false;
        for resource in servers
            .values_mut()
            .flat_map(|caps| caps.resources.iter_mut())
            .filter(|r| r.uri == uri)
        {
            evicted |= resource.content.take().is_some();
            resource.fetched_at = None;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor::new(server, name)
    }

    #[tokio::test]
    async fn test_replace_and_invalidate() {
        let cache = CapabilityCache::new();
        cache
            .replace("blender", vec![tool("blender", "add_cube")], vec![])
            .await;
        cache.replace("fs", vec![tool("fs", "read")], vec![]).await;
        assert_eq!(cache.list_tools().await.len(), 2);

        cache
            .replace("blender", vec![tool("blender", "add_sphere")], vec![])
            .await;
        let names: Vec<String> = cache
            .list_tools()
            .await
            .iter()
            .map(ToolDescriptor::qualified_name)
            .collect();
        assert_eq!(names, ["blender.add_sphere", "fs.read"]);

        cache.invalidate("blender").await;
        assert!(cache.tools_for("blender").await.is_empty());
        assert_eq!(cache.counts("fs").await, (1, 0));
    }

    #[tokio::test]
    async fn test_find_tool_qualified_and_bare() {
        let cache = CapabilityCache::new();
        cache
            .replace("a", vec![tool("a", "read"), tool("a", "write")], vec![])
            .await;
        cache.replace("b", vec![tool("b", "read")], vec![]).await;

        assert_eq!(cache.find_tool("b.read").await.unwrap().server, "b");
        assert_eq!(cache.find_tool("write").await.unwrap().server, "a");

        let ambiguous = cache.find_tool("read").await.unwrap_err();
        assert!(matches!(ambiguous, CoreError::UnknownTool(ref m) if m.contains("ambiguous")));
        assert!(matches!(
            cache.find_tool("c.read").await,
            Err(CoreError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_resource_content_store_and_evict() {
        let cache = CapabilityCache::new();
        cache
            .replace("docs", vec![], vec![ResourceDescriptor::new("docs", "file:///a.md")])
            .await;

        assert!(cache.find_resource("file:///a.md").await.unwrap().content.is_none());

        let stored = cache
            .store_content(
                "docs",
                "file:///a.md",
                ResourceContent::Text {
                    text: "hello".into(),
                    mime_type: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(stored.fetched_at.is_some());
        assert!(cache.find_resource("file:///a.md").await.unwrap().content.is_some());

        assert!(cache.evict_content("file:///a.md").await);
        assert!(!cache.evict_content("file:///a.md").await);
        assert!(cache.find_resource("file:///a.md").await.unwrap().content.is_none());

        assert!(
            cache
                .store_content(
                    "gone",
                    "file:///a.md",
                    ResourceContent::Text {
                        text: String::new(),
                        mime_type: None
                    },
                    Utc::now()
                )
                .await
                .is_none()
        );
    }
}
