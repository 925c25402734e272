//! Projections from [`ViewState`] to [`RenderParams`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::ConfigError;
use crate::constants::DEFAULT_BACKGROUND_COLOR;
use crate::renderer::Selector;
use crate::view::RenderParams;
use crate::view_state::ViewState;

/// Document `@backgroundColor`, else the configured default, else `white`.
pub fn background_selector(state: &ViewState) -> String {
    let attribute = state.document.attributes.background_color.trim();
    if !attribute.is_empty() {
        return attribute.to_string();
    }
    let configured = state.background_color.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    DEFAULT_BACKGROUND_COLOR.to_string()
}

/// Path of the Mermaid config to use: the document's `@config` relative to the document
/// directory, else the default config path (possibly empty).
pub fn mermaid_config_selector(state: &ViewState) -> String {
    let doc = &state.document;
    let path_to_config = doc.attributes.path_to_config.trim();
    if path_to_config.is_empty() {
        return state.default_mermaid_config.clone();
    }
    Path::new(&doc.current_dir)
        .join(path_to_config)
        .to_string_lossy()
        .into_owned()
}

/// Where Mermaid configuration text comes from.
pub trait ConfigSource: Send + Sync {
    /// Loads the configuration text at `path`. An empty path yields `"{}"`.
    fn load(&self, path: &str) -> BoxFuture<'static, Result<String, ConfigError>>;
}

/// Reads configuration files from disk.
///
/// `~` expands to the home directory, absolute paths are used as-is and anything else is
/// relative to the workspace root.
#[derive(Debug, Clone)]
pub struct FsConfigSource {
    workspace_root: PathBuf,
    home: Option<PathBuf>,
}

impl FsConfigSource {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, ConfigError> {
        if let Some(rest) = path.strip_prefix('~') {
            let home = self.home.as_ref().ok_or(ConfigError::UnresolvedHome)?;
            let rest = rest.trim_start_matches(['/', '\\']);
            return Ok(home.join(rest));
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Ok(candidate.to_path_buf());
        }
        Ok(self.workspace_root.join(candidate))
    }
}

impl ConfigSource for FsConfigSource {
    fn load(&self, path: &str) -> BoxFuture<'static, Result<String, ConfigError>> {
        if path.trim().is_empty() {
            return futures::future::ready(Ok("{}".to_string())).boxed();
        }
        let resolved = self.resolve(path);
        async move {
            let path = resolved?;
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Read { path, source })
        }
        .boxed()
    }
}

/// Builds the selector bound to the diagram view. A config that cannot be read renders with
/// `{}` instead.
pub fn render_params_selector(source: Arc<dyn ConfigSource>) -> Selector<ViewState, RenderParams> {
    Arc::new(move |state: Arc<ViewState>| {
        let source = Arc::clone(&source);
        async move {
            let config_path = mermaid_config_selector(&state);
            let mermaid_config = match source.load(&config_path).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(path = %config_path, error = %err, "falling back to an empty mermaid config");
                    "{}".to_string()
                }
            };
            RenderParams {
                code: state.document.code.clone(),
                mermaid_config,
                background_color: background_selector(&state),
            }
        }
        .boxed()
    })
}
