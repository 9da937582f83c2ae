//! Chromium driver for the browser strategy, over the DevTools protocol.
//!
//! One [`ChromiumLauncher`] owns a browser process; every attempt gets a
//! fresh tab with its own download directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::GetTargetsParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;

use paperchase_core::artifact::ScreenshotRegion;
use paperchase_core::browser::{ClickTarget, DomSnapshot, PDF_EMBED_SELECTOR};
use paperchase_core::{BrowserError, BrowserLauncher, BrowserPage};

const VIEWPORT: (u32, u32) = (1280, 900);
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const PARTIAL_DOWNLOAD_SUFFIX: &str = ".crdownload";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Marks each snapshot candidate so a later click can find it again.
const ID_ATTR: &str = "data-paperchase-id";

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn snapshot_script() -> String {
    format!(
        r#"(() => {{
  const W = window.innerWidth || 1, H = window.innerHeight || 1;
  const visible = (el) => {{
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) return false;
    const s = getComputedStyle(el);
    return s.visibility !== 'hidden' && s.display !== 'none' && s.opacity !== '0';
  }};
  const candidates = [];
  for (const el of document.querySelectorAll('a, button')) {{
    el.removeAttribute('{attr}');
    if (!visible(el)) continue;
    const id = candidates.length;
    el.setAttribute('{attr}', String(id));
    const r = el.getBoundingClientRect();
    const cx = (r.left + r.width / 2) / W, cy = (r.top + r.height / 2) / H;
    const inView = cx >= 0 && cx <= 1 && cy >= 0 && cy <= 1;
    candidates.push({{
      id,
      visibleText: (el.innerText || '').trim().slice(0, 200),
      ariaLabel: el.getAttribute('aria-label') || '',
      classes: el.getAttribute('class') || '',
      href: el.getAttribute('href') || '',
      title: el.getAttribute('title') || '',
      center: inView ? {{ x: cx, y: cy }} : null,
    }});
  }}
  const embed = document.querySelector({embed});
  return {{
    url: location.href,
    title: document.title || '',
    contentType: document.contentType || '',
    candidates,
    pdfEmbed: embed !== null,
    embeddedPdfUrl: embed ? (embed.getAttribute('src') || embed.getAttribute('data')) : null,
  }};
}})()"#,
        attr = ID_ATTR,
        embed = js_str(PDF_EMBED_SELECTOR),
    )
}

fn visible_script(selector: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  const r = el.getBoundingClientRect();
  const s = getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
}})()"#,
        sel = js_str(selector)
    )
}

/// Scrolls the target into view and returns its center in CSS pixels.
fn locate_script(target: ClickTarget<'_>) -> String {
    let query = match target {
        ClickTarget::Element(id) => js_str(&format!("[{ID_ATTR}=\"{id}\"]")),
        ClickTarget::Selector(sel) => js_str(sel),
    };
    format!(
        r#"(() => {{
  const el = document.querySelector({query});
  if (!el) return {{ found: false, x: 0, y: 0 }};
  el.scrollIntoView({{ block: 'center', inline: 'center' }});
  const r = el.getBoundingClientRect();
  return {{ found: true, x: r.left + r.width / 2, y: r.top + r.height / 2 }};
}})()"#
    )
}

fn scroll_script(region: ScreenshotRegion) -> &'static str {
    match region {
        ScreenshotRegion::Top => "window.scrollTo(0, 0)",
        ScreenshotRegion::Bottom => {
            "window.scrollTo(0, Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight))"
        }
    }
}

#[derive(Deserialize)]
struct Center {
    found: bool,
    x: f64,
    y: f64,
}

/// A finished download in `dir`, ignoring partial files.
fn completed_download(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.ends_with(PARTIAL_DOWNLOAD_SUFFIX) && !n.starts_with('.'))
        })
}

/// Rename, falling back to copy for cross-device moves.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

/// Launches Chromium once and hands out tabs.
pub struct ChromiumLauncher {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumLauncher {
    pub async fn launch(headless: bool) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run");
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });
        tracing::info!(headless, "browser launched");

        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }
}

impl Drop for ChromiumLauncher {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let downloads = tempfile::tempdir()?;
        allow_downloads(&page, downloads.path()).await?;
        let known = HashSet::from([tab_id(&page)]);
        Ok(Box::new(ChromiumPage {
            browser: self.browser.clone(),
            page,
            opened: Vec::new(),
            known,
            downloads,
        }))
    }
}

fn tab_id(page: &Page) -> String {
    let id: &str = page.target_id().as_ref();
    id.to_string()
}

async fn allow_downloads(page: &Page, dir: &Path) -> Result<(), BrowserError> {
    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(dir.to_string_lossy().into_owned())
        .build()
        .map_err(BrowserError::Protocol)?;
    page.execute(params).await.map_err(protocol)?;
    Ok(())
}

/// One tab plus any tabs it opened.
pub struct ChromiumPage {
    browser: Arc<Browser>,
    page: Page,
    /// Tabs opened by clicks, closed together with the page.
    opened: Vec<Page>,
    /// Target ids of this tab and every tab it has followed.
    known: HashSet<String>,
    downloads: tempfile::TempDir,
}

impl ChromiumPage {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, BrowserError> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(protocol)
    }

    /// Switch to a tab the current one opened during the last action, if any.
    async fn follow_new_tab(&mut self) -> Result<(), BrowserError> {
        let current = tab_id(&self.page);
        let targets = self
            .page
            .execute(GetTargetsParams::default())
            .await
            .map_err(protocol)?
            .result
            .target_infos;
        let child = targets.into_iter().find(|t| {
            t.r#type == "page"
                && t.opener_id.as_ref().is_some_and(|o| {
                    let o: &str = o.as_ref();
                    o == current
                })
                && !self.known.contains(AsRef::<str>::as_ref(&t.target_id))
        });
        let Some(child) = child else {
            return Ok(());
        };

        let page = self.browser.get_page(child.target_id).await.map_err(protocol)?;
        tracing::debug!(url = %child.url, "following newly opened tab");
        self.known.insert(tab_id(&page));
        allow_downloads(&page, self.downloads.path()).await?;
        let previous = std::mem::replace(&mut self.page, page);
        self.opened.push(previous);
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{url}: {e}")))?;
        // Direct PDF links may never fire a load event; this is best effort.
        if let Err(e) = self.page.wait_for_navigation().await {
            tracing::debug!(url, error = %e, "waiting for load failed");
        }
        Ok(())
    }

    async fn scroll_to(&mut self, region: ScreenshotRegion) -> Result<(), BrowserError> {
        self.page
            .evaluate(scroll_script(region))
            .await
            .map_err(protocol)?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page.screenshot(params).await.map_err(protocol)
    }

    async fn snapshot(&mut self) -> Result<DomSnapshot, BrowserError> {
        self.eval(&snapshot_script()).await
    }

    async fn is_visible(&mut self, selector: &str) -> Result<bool, BrowserError> {
        self.eval(&visible_script(selector)).await
    }

    async fn click(&mut self, target: ClickTarget<'_>) -> Result<(), BrowserError> {
        let center: Center = self.eval(&locate_script(target)).await?;
        if !center.found {
            return Err(BrowserError::Protocol(format!("{target:?} not found on page")));
        }
        self.page
            .click(Point::new(center.x, center.y))
            .await
            .map_err(protocol)?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.follow_new_tab().await
    }

    async fn press_save(&mut self) -> Result<(), BrowserError> {
        let modifiers = if cfg!(target_os = "macos") { 4 } else { 2 };
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key("s")
                .code("KeyS")
                .windows_virtual_key_code(83)
                .modifiers(modifiers)
                .build()
                .map_err(BrowserError::Protocol)?;
            self.page.execute(params).await.map_err(protocol)?;
        }
        Ok(())
    }

    async fn take_download(&mut self, dest: &Path, wait: Duration) -> Result<bool, BrowserError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(done) = completed_download(self.downloads.path()) {
                move_file(&done, dest)?;
                tracing::debug!(dest = %dest.display(), "download captured");
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        for page in self.opened.drain(..) {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "closing opened tab failed");
            }
        }
        self.page.clone().close().await.map_err(protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_downloads_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("paper.pdf.crdownload"), b"%PDF").unwrap();
        assert!(completed_download(dir.path()).is_none());

        std::fs::write(dir.path().join("paper.pdf"), b"%PDF").unwrap();
        let done = completed_download(dir.path()).unwrap();
        assert_eq!(done.file_name().unwrap(), "paper.pdf");
    }

    #[test]
    fn move_file_replaces_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b.pdf");
        std::fs::write(&from, b"bytes").unwrap();
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"bytes");
    }

    #[test]
    fn selectors_are_quoted_into_scripts() {
        let script = visible_script("button[title*=\"Download\"]");
        assert!(script.contains(r#"document.querySelector("button[title*=\"Download\"]")"#));

        let click = locate_script(ClickTarget::Element(7));
        assert!(click.contains(r#"[data-paperchase-id=\"7\"]"#));
    }

    #[test]
    fn snapshot_script_uses_embed_selector() {
        let script = snapshot_script();
        assert!(script.contains("querySelectorAll('a, button')"));
        assert!(script.contains("application/pdf"));
        assert!(!script.contains("{attr}"));
    }
}
