use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub sources: Option<SourcesConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub browser: Option<BrowserConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub unpaywall_email: Option<String>,
    pub core_api_key: Option<String>,
    pub crossref_mailto: Option<String>,
    pub s2_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub disabled: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
    pub source_timeout_secs: Option<u64>,
    pub min_pdf_size: Option<u64>,
    pub vision_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
    pub browser_workers: Option<usize>,
    /// Seconds between phase-1 submissions.
    pub delay_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: Option<bool>,
    pub timeout_secs: Option<u64>,
}

/// Platform config directory path: `<config_dir>/paperchase/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("paperchase").join("config.toml"))
}

/// Load config by cascading CWD `.paperchase.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".paperchase.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<S, T: Clone>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> &Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(|s| field(s).clone())
        .or_else(|| base.as_ref().and_then(|s| field(s).clone()))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (ob, bb) = (&overlay.api_keys, &base.api_keys);
    let (os, bs) = (&overlay.sources, &base.sources);
    let (oc, bc) = (&overlay.concurrency, &base.concurrency);
    let (ow, bw) = (&overlay.browser, &base.browser);

    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            unpaywall_email: pick(ob, bb, |a| &a.unpaywall_email),
            core_api_key: pick(ob, bb, |a| &a.core_api_key),
            crossref_mailto: pick(ob, bb, |a| &a.crossref_mailto),
            s2_api_key: pick(ob, bb, |a| &a.s2_api_key),
            anthropic_api_key: pick(ob, bb, |a| &a.anthropic_api_key),
        }),
        sources: Some(SourcesConfig {
            disabled: pick(os, bs, |s| &s.disabled),
            request_timeout_secs: pick(os, bs, |s| &s.request_timeout_secs),
            source_timeout_secs: pick(os, bs, |s| &s.source_timeout_secs),
            min_pdf_size: pick(os, bs, |s| &s.min_pdf_size),
            vision_model: pick(os, bs, |s| &s.vision_model),
        }),
        concurrency: Some(ConcurrencyConfig {
            num_workers: pick(oc, bc, |c| &c.num_workers),
            browser_workers: pick(oc, bc, |c| &c.browser_workers),
            delay_secs: pick(oc, bc, |c| &c.delay_secs),
        }),
        browser: Some(BrowserConfig {
            headless: pick(ow, bw, |b| &b.headless),
            timeout_secs: pick(ow, bw, |b| &b.timeout_secs),
        }),
    }
}

impl ConfigFile {
    /// Overwrite `config` with every value this file sets.
    pub fn apply(&self, config: &mut Config) {
        if let Some(keys) = &self.api_keys {
            let set = |slot: &mut Option<String>, value: &Option<String>| {
                if value.is_some() {
                    slot.clone_from(value);
                }
            };
            set(&mut config.unpaywall_email, &keys.unpaywall_email);
            set(&mut config.core_api_key, &keys.core_api_key);
            set(&mut config.crossref_mailto, &keys.crossref_mailto);
            set(&mut config.s2_api_key, &keys.s2_api_key);
            set(&mut config.anthropic_api_key, &keys.anthropic_api_key);
        }
        if let Some(sources) = &self.sources {
            if let Some(disabled) = &sources.disabled {
                config.disabled_sources.clone_from(disabled);
            }
            if let Some(v) = sources.request_timeout_secs {
                config.request_timeout_secs = v;
            }
            if let Some(v) = sources.source_timeout_secs {
                config.source_timeout_secs = v;
            }
            if let Some(v) = sources.min_pdf_size {
                config.min_pdf_size = v;
            }
            if let Some(model) = &sources.vision_model {
                config.vision_model.clone_from(model);
            }
        }
        if let Some(c) = &self.concurrency {
            if let Some(n) = c.num_workers {
                config.num_workers = n.max(1);
            }
            if let Some(n) = c.browser_workers {
                config.browser_workers = n.max(1);
            }
            if let Some(secs) = c.delay_secs.filter(|s| s.is_finite() && *s >= 0.0) {
                config.submit_delay = Duration::from_secs_f64(secs);
            }
        }
        if let Some(b) = &self.browser {
            if let Some(headless) = b.headless {
                config.headless = headless;
            }
            if let Some(secs) = b.timeout_secs {
                config.browser_timeout_secs = secs;
            }
        }
    }
}
