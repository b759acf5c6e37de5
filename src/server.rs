use std::sync::Arc;

use rmcp::handler::server::tool::{ToolBox, ToolBoxItem, ToolCallContext};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, ToolsCapability,
};
use rmcp::schemars::{self, JsonSchema};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{serve_server, transport::io::stdio, Error as McpError, ServerHandler};
use serde::Deserialize;

use crate::catalog::{load_catalog, Catalog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::resolve_model;
use crate::search::{OnnxModelLoader, QueryEmbedder, SearchMode, SearchOutcome, SearchSession};

/// Parameters for the search_icons tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchIconsParams {
    /// What to look for, e.g. "a picture of a phone" or "recycle bin". Empty lists every icon.
    #[serde(default)]
    pub query: String,
    /// Maximum number of results to return (default: 20, max: 200)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Search mode: "hybrid" (default, semantic with text fallback), "keyword" (text matching only), or "semantic" (embedding similarity only)
    #[serde(default)]
    pub mode: Option<String>,
    /// Set for search-as-you-type input: the call is debounced and a newer interactive call replaces it (default: false)
    #[serde(default)]
    pub interactive: bool,
}

/// Parameters for the get_icon tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetIconParams {
    /// The icon's unique name
    pub name: String,
}

/// Parameters for the catalog_info tool
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CatalogInfoParams {}

fn default_limit() -> usize {
    20
}

/// MCP Server for the icon catalog
#[derive(Clone)]
pub struct IconSearchServer {
    session: Arc<SearchSession>,
}

impl IconSearchServer {
    pub async fn new(config: Config) -> Result<Self> {
        let catalog = load_catalog(config.catalog_path.clone(), config.dimension).await?;
        let embedder = if config.semantic {
            Some(Arc::new(Self::build_embedder(&config, &catalog)))
        } else {
            tracing::info!("Semantic search disabled, using text matching only");
            None
        };

        // Warm the model in the background so the first query does not pay for it
        if let Some(embedder) = &embedder {
            let embedder = Arc::clone(embedder);
            tokio::spawn(async move {
                if let Err(e) = embedder.acquire().await {
                    tracing::warn!("Semantic search will be unavailable: {}", e);
                }
            });
        }

        Ok(Self {
            session: Arc::new(SearchSession::new(catalog, embedder, config.debounce)),
        })
    }

    fn build_embedder(config: &Config, catalog: &Catalog) -> QueryEmbedder {
        let source = resolve_model(config.model.as_deref(), catalog.metadata().embedding_model());
        if let Some(dim) = catalog.dimension()
            && dim != source.dimension
        {
            tracing::warn!(
                "Model {} produces {}-dimensional embeddings but the catalog uses {}; queries will fall back to text matching",
                source.id,
                source.dimension,
                dim
            );
        }

        let loader = OnnxModelLoader::new(config.models_dir.clone(), source);
        QueryEmbedder::with_timeout(loader, config.model_load_timeout)
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting icon-search server on stdio");
        let transport = stdio();
        let _service = serve_server(self, transport)
            .await
            .map_err(|e| Error::Other(format!("Failed to start MCP server: {}", e)))?;
        // Keep running until terminated
        tokio::signal::ctrl_c().await.ok();
        Ok(())
    }

    /// Interactive searches go through the debounced session and return
    /// `None` when a newer interactive search replaced them. Other searches
    /// run at once and are independent of each other.
    async fn run_search(&self, query: &str, mode: SearchMode, interactive: bool) -> Option<Arc<SearchOutcome>> {
        if interactive {
            self.session.submit_with_mode(query, mode).await.applied()
        } else {
            Some(Arc::new(self.session.search_now(query, mode).await))
        }
    }

    fn model_status_json(&self) -> serde_json::Value {
        match self.session.embedder() {
            Some(embedder) => serde_json::json!({
                "model": embedder.model_name(),
                "status": embedder.status(),
            }),
            None => serde_json::json!({ "status": { "state": "disabled" } }),
        }
    }

    // Tool definition for search_icons
    fn search_icons_tool_attr() -> rmcp::model::Tool {
        use rmcp::handler::server::tool::cached_schema_for_type;
        rmcp::model::Tool {
            name: "search_icons".into(),
            description: "Search the icon catalog by meaning or by name. Uses semantic similarity when the embedding model is available and falls back to text matching on names and descriptions. Calls are independent unless marked interactive, in which case only the latest interactive call gets results.".into(),
            input_schema: cached_schema_for_type::<SearchIconsParams>(),
        }
    }

    async fn search_icons_tool_call(
        context: ToolCallContext<'_, Self>,
    ) -> std::result::Result<CallToolResult, McpError> {
        use rmcp::handler::server::tool::FromToolCallContextPart;
        use rmcp::handler::server::tool::Parameters;
        use rmcp::model::Content;

        let (callee, context) =
            <&Self as FromToolCallContextPart<'_, Self>>::from_tool_call_context_part(context)?;
        let (Parameters(params), _context) =
            <Parameters<SearchIconsParams> as FromToolCallContextPart<'_, Self>>::from_tool_call_context_part(context)?;

        let limit = if params.limit == 0 { 20 } else { params.limit.min(200) };
        let mode = params.mode.as_deref().map(SearchMode::parse).unwrap_or_default();

        let Some(outcome) = callee.run_search(&params.query, mode, params.interactive).await else {
            return Ok(CallToolResult::success(vec![Content::text(
                "Superseded by a newer interactive query.",
            )]));
        };

        if outcome.is_empty() {
            let hint = if outcome.degraded {
                " Semantic search is unavailable, so only exact text matches were tried."
            } else {
                ""
            };
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "No icons found for '{}'.{} Try different keywords.",
                params.query, hint
            ))]));
        }

        let response = serde_json::json!({
            "query": outcome.query,
            "path": outcome.path,
            "degraded": outcome.degraded,
            "total": outcome.len(),
            "results": outcome.results.iter().take(limit).collect::<Vec<_>>(),
        });

        match serde_json::to_string_pretty(&response) {
            Ok(json) => Ok(CallToolResult::success(vec![Content::text(json)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to serialize results: {}",
                e
            ))])),
        }
    }

    // Tool definition for get_icon
    fn get_icon_tool_attr() -> rmcp::model::Tool {
        use rmcp::handler::server::tool::cached_schema_for_type;
        rmcp::model::Tool {
            name: "get_icon".into(),
            description: "Get the details of one icon by its exact name: file name, asset path, description and pixel size.".into(),
            input_schema: cached_schema_for_type::<GetIconParams>(),
        }
    }

    async fn get_icon_tool_call(
        context: ToolCallContext<'_, Self>,
    ) -> std::result::Result<CallToolResult, McpError> {
        use rmcp::handler::server::tool::FromToolCallContextPart;
        use rmcp::handler::server::tool::Parameters;
        use rmcp::model::Content;

        let (callee, context) =
            <&Self as FromToolCallContextPart<'_, Self>>::from_tool_call_context_part(context)?;
        let (Parameters(params), _context) =
            <Parameters<GetIconParams> as FromToolCallContextPart<'_, Self>>::from_tool_call_context_part(context)?;

        let Some(icon) = callee.session.catalog().get(params.name.trim()) else {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "No icon named '{}'. Use search_icons to find icon names.",
                params.name
            ))]));
        };

        let response = serde_json::json!({
            "icon": icon,
            "has_embedding": icon.embedding.is_some(),
        });

        match serde_json::to_string_pretty(&response) {
            Ok(json) => Ok(CallToolResult::success(vec![Content::text(json)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to serialize icon: {}", e
            ))])),
        }
    }

    // Tool definition for catalog_info
    fn catalog_info_tool_attr() -> rmcp::model::Tool {
        use rmcp::handler::server::tool::cached_schema_for_type;
        rmcp::model::Tool {
            name: "catalog_info".into(),
            description: "Describe the loaded icon catalog: record counts, embedding coverage, build metadata and whether semantic search is available.".into(),
            input_schema: cached_schema_for_type::<CatalogInfoParams>(),
        }
    }

    async fn catalog_info_tool_call(
        context: ToolCallContext<'_, Self>,
    ) -> std::result::Result<CallToolResult, McpError> {
        use rmcp::handler::server::tool::FromToolCallContextPart;
        use rmcp::model::Content;

        let (callee, _context) =
            <&Self as FromToolCallContextPart<'_, Self>>::from_tool_call_context_part(context)?;

        let catalog = callee.session.catalog();
        let response = serde_json::json!({
            "stats": catalog.stats(),
            "dimension": catalog.dimension(),
            "metadata": catalog.metadata(),
            "model": callee.model_status_json(),
        });

        match serde_json::to_string_pretty(&response) {
            Ok(json) => Ok(CallToolResult::success(vec![Content::text(json)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to serialize catalog info: {}", e
            ))])),
        }
    }

    fn tool_box() -> &'static ToolBox<Self> {
        use std::sync::OnceLock;
        static TOOL_BOX: OnceLock<ToolBox<IconSearchServer>> = OnceLock::new();
        TOOL_BOX.get_or_init(|| {
            let mut tool_box = ToolBox::new();
            tool_box.add(ToolBoxItem::new(
                Self::search_icons_tool_attr(),
                |context| Box::pin(Self::search_icons_tool_call(context)),
            ));
            tool_box.add(ToolBoxItem::new(
                Self::get_icon_tool_attr(),
                |context| Box::pin(Self::get_icon_tool_call(context)),
            ));
            tool_box.add(ToolBoxItem::new(
                Self::catalog_info_tool_attr(),
                |context| Box::pin(Self::catalog_info_tool_call(context)),
            ));
            tool_box
        })
    }
}

impl ServerHandler for IconSearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: None,
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "icon-search".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Search a catalog of retro desktop icons. Use search_icons to find icons, get_icon for details."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: PaginatedRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: Self::tool_box().list(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_context = ToolCallContext::new(self, request, context);
        Self::tool_box().call(tool_context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::write_catalog;

    #[tokio::test]
    async fn test_server_loads_catalog_without_model() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("icons.db");
        write_catalog(&path, &[("calculator", "a simple calculator tool", None)], &[]);

        let config = Config {
            catalog_path: path,
            semantic: false,
            debounce: std::time::Duration::ZERO,
            ..Config::from_lookup(|_| None)
        };
        let server = IconSearchServer::new(config).await.unwrap();
        assert_eq!(server.session.catalog().len(), 1);
        assert_eq!(server.model_status_json()["status"]["state"], "disabled");

        let outcome = server.session.submit("calc").await.applied().unwrap();
        assert_eq!(outcome.names(), vec!["calculator"]);
    }

    #[tokio::test]
    async fn test_parallel_searches_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("icons.db");
        write_catalog(
            &path,
            &[
                ("calculator", "a simple calculator tool", None),
                ("notepad", "a text editor", None),
            ],
            &[],
        );

        let config = Config {
            catalog_path: path,
            semantic: false,
            debounce: std::time::Duration::from_millis(50),
            ..Config::from_lookup(|_| None)
        };
        let server = IconSearchServer::new(config).await.unwrap();

        let (calc, notes) = tokio::join!(
            server.run_search("calc", SearchMode::Hybrid, false),
            server.run_search("editor", SearchMode::Hybrid, false)
        );
        assert_eq!(calc.unwrap().names(), vec!["calculator"]);
        assert_eq!(notes.unwrap().names(), vec!["notepad"]);

        let (calc, notes) = tokio::join!(
            server.run_search("calc", SearchMode::Hybrid, true),
            server.run_search("editor", SearchMode::Hybrid, true)
        );
        assert!(calc.is_none());
        assert_eq!(notes.unwrap().names(), vec!["notepad"]);
    }

    #[tokio::test]
    async fn test_missing_catalog_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            catalog_path: tmp.path().join("missing.db"),
            ..Config::from_lookup(|_| None)
        };
        let err = IconSearchServer::new(config).await.err().unwrap();
        assert!(matches!(err, Error::CatalogUnavailable { .. }));
    }

    #[test]
    fn test_tool_box_lists_tools() {
        let names: Vec<String> = IconSearchServer::tool_box()
            .list()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(names.len(), 3);
        for expected in ["search_icons", "get_icon", "catalog_info"] {
            assert!(names.iter().any(|n| n == expected));
        }
    }
}
