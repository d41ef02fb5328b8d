use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::openai_client::DEFAULT_OPENAI_BASE_URL;
use crate::panel::DEFAULT_PANEL_WIDTH;

pub const CONFIG_FILE_NAME: &str = ".codeai.json";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are CodeAI, an expert programming assistant. Help users with coding questions, provide code examples, explain concepts, and analyze code. When showing code, always use proper markdown formatting with language specification. You can also generate Mermaid diagrams to visualize code structure, flows, and architecture. Be concise but thorough in your explanations.";
pub const DEFAULT_MAX_TOOL_STEPS: usize = 5;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CELL_WIDTH_PX: u32 = 8;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub debug: Option<bool>,
    pub providers: Option<Providers>,
    pub agent: Option<AgentConfig>,
    pub diagram: Option<DiagramConfig>,
    pub panel: Option<PanelConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Providers {
    pub openai: Option<OpenAIProviderConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OpenAIProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub disabled: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tool_steps: Option<usize>,
    pub tool_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DiagramConfig {
    pub endpoint: Option<String>,
    /// Rendering engine. Only `mermaid` is supported.
    pub engine: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    pub initial_width: Option<u32>,
    pub cell_width_px: Option<u32>,
}

impl Config {
    pub fn load() -> Self {
        let config_paths = [
            dirs::home_dir().map(|p| p.join(CONFIG_FILE_NAME)),
            dirs::config_dir().map(|p| p.join("codeai").join(CONFIG_FILE_NAME)),
            Some(PathBuf::from(".").join(CONFIG_FILE_NAME)),
        ];
        let paths: Vec<PathBuf> = config_paths.into_iter().flatten().collect();
        let mut cfg = Self::load_from_paths(&paths);
        cfg.apply_env(|key| env::var(key).ok());
        log::debug!("Loaded config: {:?}", cfg.redacted());
        cfg
    }

    /// Loads and merges `paths` in order; later files override earlier ones.
    /// Missing or unparseable files are skipped.
    pub fn load_from_paths(paths: &[PathBuf]) -> Self {
        let mut config = Config::default();
        for path in paths {
            if !path.exists() {
                continue;
            }
            log::debug!("Attempting to load config from: {:?}", path);
            match Self::read_file(path) {
                Ok(loaded) => {
                    config.merge(loaded);
                    log::info!("Successfully loaded and merged config from: {:?}", path);
                }
                Err(e) => log::warn!("Failed to load config file at {:?}: {}", path, e),
            }
        }
        config
    }

    fn read_file(path: &Path) -> Result<Config, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str::<Config>(&content).map_err(|e| e.to_string())
    }

    fn merge(&mut self, loaded: Config) {
        if loaded.debug.is_some() {
            self.debug = loaded.debug;
        }

        if let Some(loaded_providers) = loaded.providers {
            let current_providers = self.providers.get_or_insert_with(Default::default);
            if let Some(loaded_openai) = loaded_providers.openai {
                let current = current_providers.openai.get_or_insert_with(Default::default);
                if loaded_openai.api_key.is_some() { current.api_key = loaded_openai.api_key; }
                if loaded_openai.base_url.is_some() { current.base_url = loaded_openai.base_url; }
                if loaded_openai.disabled.is_some() { current.disabled = loaded_openai.disabled; }
            }
        }

        if let Some(loaded_agent) = loaded.agent {
            let current = self.agent.get_or_insert_with(Default::default);
            if loaded_agent.model.is_some() { current.model = loaded_agent.model; }
            if loaded_agent.system_prompt.is_some() { current.system_prompt = loaded_agent.system_prompt; }
            if loaded_agent.max_tool_steps.is_some() { current.max_tool_steps = loaded_agent.max_tool_steps; }
            if loaded_agent.tool_timeout_secs.is_some() { current.tool_timeout_secs = loaded_agent.tool_timeout_secs; }
        }

        if let Some(loaded_diagram) = loaded.diagram {
            let current = self.diagram.get_or_insert_with(Default::default);
            if loaded_diagram.endpoint.is_some() { current.endpoint = loaded_diagram.endpoint; }
            if loaded_diagram.engine.is_some() { current.engine = loaded_diagram.engine; }
        }

        if let Some(loaded_panel) = loaded.panel {
            let current = self.panel.get_or_insert_with(Default::default);
            if loaded_panel.initial_width.is_some() { current.initial_width = loaded_panel.initial_width; }
            if loaded_panel.cell_width_px.is_some() { current.cell_width_px = loaded_panel.cell_width_px; }
        }
    }

    /// Applies environment overrides. `lookup` is `env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            let providers = self.providers.get_or_insert_with(Default::default);
            providers.openai.get_or_insert_with(Default::default).api_key = Some(api_key);
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL").filter(|u| !u.is_empty()) {
            let providers = self.providers.get_or_insert_with(Default::default);
            providers.openai.get_or_insert_with(Default::default).base_url = Some(base_url);
        }
        if let Some(model) = lookup("CODEAI_MODEL").filter(|m| !m.is_empty()) {
            self.agent.get_or_insert_with(Default::default).model = Some(model);
        }
        if let Some(endpoint) = lookup("CODEAI_DIAGRAM_URL").filter(|u| !u.is_empty()) {
            self.diagram.get_or_insert_with(Default::default).endpoint = Some(endpoint);
        }
        if let Some(debug_env) = lookup("CODEAI_DEBUG").and_then(|s| s.parse::<bool>().ok()) {
            self.debug = Some(debug_env);
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    fn openai(&self) -> Option<&OpenAIProviderConfig> {
        self.providers.as_ref().and_then(|p| p.openai.as_ref())
    }

    /// API key of the OpenAI provider, unless the provider is disabled.
    pub fn openai_api_key(&self) -> Option<String> {
        let openai = self.openai()?;
        if openai.disabled.unwrap_or(false) {
            return None;
        }
        openai.api_key.clone().filter(|k| !k.is_empty())
    }

    pub fn openai_base_url(&self) -> String {
        self.openai()
            .and_then(|o| o.base_url.clone())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
    }

    pub fn model(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn system_prompt(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    pub fn max_tool_steps(&self) -> usize {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_steps)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_TOOL_STEPS)
    }

    pub fn tool_timeout(&self) -> std::time::Duration {
        let secs = self
            .agent
            .as_ref()
            .and_then(|a| a.tool_timeout_secs)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);
        std::time::Duration::from_secs(secs)
    }

    pub fn diagram_endpoint(&self) -> Option<String> {
        self.diagram.as_ref().and_then(|d| d.endpoint.clone()).filter(|u| !u.is_empty())
    }

    pub fn diagram_engine(&self) -> String {
        self.diagram
            .as_ref()
            .and_then(|d| d.engine.clone())
            .unwrap_or_else(|| "mermaid".to_string())
    }

    pub fn panel_initial_width(&self) -> u32 {
        self.panel.as_ref().and_then(|p| p.initial_width).unwrap_or(DEFAULT_PANEL_WIDTH)
    }

    pub fn cell_width_px(&self) -> u32 {
        self.panel
            .as_ref()
            .and_then(|p| p.cell_width_px)
            .filter(|w| *w > 0)
            .unwrap_or(DEFAULT_CELL_WIDTH_PX)
    }

    /// Copy safe to log: the API key is masked.
    fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if let Some(openai) = copy.providers.as_mut().and_then(|p| p.openai.as_mut()) {
            if openai.api_key.is_some() {
                openai.api_key = Some("***".to_string());
            }
        }
        copy
    }
}
