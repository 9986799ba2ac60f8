use crate::error::{SyncError, SyncResult};
use crate::tag_utils::TagTaxonomy;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_TAG_URL: &str = "https://api.mangadex.org/manga/tag";
const CURL: &str = "curl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Curl,
    Http,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backend::Curl => write!(f, "curl"),
            Backend::Http => write!(f, "http"),
        }
    }
}

#[async_trait]
pub trait TagFetcher: Send + Sync {
    fn url(&self) -> &str;

    /// Fails before any side effect when the fetcher cannot run on this host.
    fn check_available(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn fetch_raw(&self) -> SyncResult<Value>;

    async fn fetch_tags(&self) -> SyncResult<TagTaxonomy> {
        TagTaxonomy::from_value(self.fetch_raw().await?)
    }
}

pub fn new_fetcher(backend: Backend, url: &str) -> Box<dyn TagFetcher> {
    match backend {
        Backend::Curl => Box::new(CurlFetcher::new(url)),
        Backend::Http => Box::new(HttpFetcher::new(url)),
    }
}

/// Shells out to `curl -sL`.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    url: String,
    program: String,
}

impl CurlFetcher {
    pub fn new(url: &str) -> Self {
        CurlFetcher {
            url: url.to_string(),
            program: CURL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_program(url: &str, program: &str) -> Self {
        CurlFetcher {
            url: url.to_string(),
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl TagFetcher for CurlFetcher {
    fn url(&self) -> &str {
        &self.url
    }

    fn check_available(&self) -> SyncResult<()> {
        match find_on_path(&self.program) {
            Some(path) => {
                tracing::debug!("using {}", path.display());
                Ok(())
            }
            None => Err(SyncError::Precondition { tool: CURL }),
        }
    }

    async fn fetch_raw(&self) -> SyncResult<Value> {
        let output = Command::new(&self.program)
            .args(["-sL", self.url.as_str()])
            .output()
            .await
            .map_err(|e| SyncError::remote(&self.url, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::remote(
                &self.url,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| SyncError::remote(&self.url, format!("invalid JSON: {}", e)))
    }
}

/// In-process GET through reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    url: String,
    client: Client,
}

impl HttpFetcher {
    pub fn new(url: &str) -> Self {
        HttpFetcher {
            url: url.to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl TagFetcher for HttpFetcher {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_raw(&self) -> SyncResult<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::remote(&self.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::remote(&self.url, format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::remote(&self.url, format!("invalid JSON: {}", e)))
    }
}

/// Fetch with a spinner on stderr when it is a terminal.
pub async fn fetch_with_progress(fetcher: &dyn TagFetcher) -> SyncResult<TagTaxonomy> {
    let spinner = if std::io::stderr().is_terminal() {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
            bar.set_style(style);
        }
        bar.set_message(format!("Fetching {}", fetcher.url()));
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(bar)
    } else {
        None
    };

    let result = fetcher.fetch_tags().await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    result
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        executable_names(program)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| is_executable(path))
    })
}

#[cfg(windows)]
fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string(), format!("{}.exe", program)]
}

#[cfg(not(windows))]
fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
