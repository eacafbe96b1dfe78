//! Driven Browser Runtime: a persistent, single-session Node+Playwright
//! child process, addressed with one JSON command per line on stdin and one
//! JSON response per line on stdout.
//!
//! Single-session discipline: starting a new session tears down any
//! previous child process first; `close` is idempotent.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use webpipe_core::{BrowserDriver, BrowserSnapshot, Error, Result, ScrollMode, SelectBy};

/// Embedded Node driver script: maintains one `browser`/`context`/`page`
/// triple, reads newline-delimited JSON commands from stdin, writes
/// newline-delimited JSON responses to stdout.
const NODE_DRIVER_SCRIPT: &str = r#"
const { chromium } = require('playwright');
const readline = require('readline');

let browser = null;
let context = null;
let page = null;

const rl = readline.createInterface({ input: process.stdin, terminal: false });

function reply(obj) {
  process.stdout.write(JSON.stringify(obj) + "\n");
}

async function teardown() {
  try { if (context) await context.close(); } catch (e) {}
  try { if (browser) await browser.close(); } catch (e) {}
  browser = null; context = null; page = null;
}

async function handle(cmd) {
  try {
    switch (cmd.op) {
      case 'start': {
        await teardown();
        browser = await chromium.launch({ headless: cmd.headless !== false });
        context = await browser.newContext();
        page = await context.newPage();
        if (cmd.startUrl) {
          await page.goto(cmd.startUrl, { waitUntil: 'domcontentloaded', timeout: cmd.timeoutMs || 30000 });
        }
        return { ok: true, url: page.url() };
      }
      case 'open': {
        if (!page) return { ok: false, error: 'NoSession' };
        await page.goto(cmd.url, { waitUntil: 'domcontentloaded', timeout: cmd.timeoutMs || 30000 });
        return { ok: true, url: page.url() };
      }
      case 'click': {
        if (!page) return { ok: false, error: 'NoSession' };
        const loc = page.locator(cmd.selector).first();
        await loc.click({ timeout: cmd.timeoutMs || 15000 });
        if (cmd.waitForNavigation) {
          await page.waitForLoadState('domcontentloaded', { timeout: cmd.timeoutMs || 15000 });
        }
        return { ok: true, url: page.url() };
      }
      case 'type': {
        if (!page) return { ok: false, error: 'NoSession' };
        const loc = page.locator(cmd.selector).first();
        if (cmd.append) {
          await loc.type(cmd.text, { timeout: cmd.timeoutMs || 15000 });
        } else {
          await loc.fill(cmd.text, { timeout: cmd.timeoutMs || 15000 });
        }
        if (cmd.pressEnter) {
          await loc.press('Enter');
        }
        return { ok: true, url: page.url() };
      }
      case 'select': {
        if (!page) return { ok: false, error: 'NoSession' };
        const loc = page.locator(cmd.selector).first();
        if (cmd.value !== null && cmd.value !== undefined) {
          await loc.selectOption({ value: cmd.value }, { timeout: cmd.timeoutMs || 15000 });
        } else if (cmd.label !== null && cmd.label !== undefined) {
          await loc.selectOption({ label: cmd.label }, { timeout: cmd.timeoutMs || 15000 });
        } else if (cmd.index !== null && cmd.index !== undefined) {
          await loc.selectOption({ index: cmd.index }, { timeout: cmd.timeoutMs || 15000 });
        } else {
          return { ok: false, error: 'BadInput' };
        }
        return { ok: true, url: page.url() };
      }
      case 'scroll': {
        if (!page) return { ok: false, error: 'NoSession' };
        const pos = await page.evaluate(({ mode, x, y }) => {
          if (mode === 'to') { window.scrollTo(x, y); } else { window.scrollBy(x, y); }
          return { x: window.scrollX, y: window.scrollY };
        }, { mode: cmd.mode, x: cmd.x, y: cmd.y });
        return { ok: true, url: page.url(), x: pos.x, y: pos.y };
      }
      case 'waitFor': {
        if (!page) return { ok: false, error: 'NoSession' };
        await page.locator(cmd.selector).first().waitFor({ state: 'visible', timeout: cmd.timeoutMs || 15000 });
        return { ok: true, url: page.url() };
      }
      case 'snapshot': {
        if (!page) return { ok: false, error: 'NoSession' };
        const title = await page.title();
        let text = await page.evaluate(() => document.body ? document.body.innerText : '');
        text = text.replace(/[ \t]+\n/g, '\n').replace(/\n{3,}/g, '\n\n');
        const max = cmd.maxTextChars || 25000;
        if (text.length > max) text = text.slice(0, max);
        const out = { ok: true, url: page.url(), title, text };
        if (cmd.includeHtml) out.html = await page.content();
        return out;
      }
      case 'close': {
        await teardown();
        return { ok: true };
      }
      default:
        return { ok: false, error: 'UnknownOp' };
    }
  } catch (e) {
    return { ok: false, error: String(e && e.message ? e.message : e) };
  }
}

rl.on('line', async (line) => {
  if (!line.trim()) return;
  let cmd;
  try { cmd = JSON.parse(line); } catch (e) { reply({ ok: false, error: 'BadInput' }); return; }
  const result = await handle(cmd);
  reply(result);
});

process.stdin.on('end', async () => { await teardown(); process.exit(0); });
"#;

fn node_binary() -> String {
    std::env::var("WEBPIPE_NODE_PATH")
        .or_else(|_| std::env::var("WEBPIPE_NODE"))
        .unwrap_or_else(|_| "node".to_string())
}

fn render_disabled() -> bool {
    matches!(
        std::env::var("WEBPIPE_RENDER_DISABLE").unwrap_or_default().trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

struct ChildSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

async fn send_and_recv(session: &mut ChildSession, cmd: Value, timeout_ms: u64) -> Result<Value> {
    let line = format!("{}\n", serde_json::to_string(&cmd).map_err(|e| Error::Generic(e.to_string()))?);
    session.stdin.write_all(line.as_bytes()).await.map_err(|e| Error::Generic(e.to_string()))?;
    session.stdin.flush().await.map_err(|e| Error::Generic(e.to_string()))?;

    let mut buf = String::new();
    let read = tokio::time::timeout(Duration::from_millis(timeout_ms), session.stdout.read_line(&mut buf)).await;
    match read {
        Ok(Ok(0)) => Err(Error::Generic("browser driver process closed stdout".to_string())),
        Ok(Ok(_)) => serde_json::from_str(buf.trim()).map_err(|e| Error::Generic(e.to_string())),
        Ok(Err(e)) => Err(Error::Generic(e.to_string())),
        Err(_) => Err(Error::Timeout),
    }
}

fn translate_error_response(v: &Value) -> Error {
    match v.get("error").and_then(|e| e.as_str()) {
        Some("NoSession") => Error::NoSession,
        Some("BadInput") => Error::BadInput("conflicting or missing select input".to_string()),
        Some(other) => Error::Generic(other.to_string()),
        None => Error::Generic("browser driver returned ok:false with no error".to_string()),
    }
}

/// Driven Browser Runtime backed by a persistent Playwright child process.
pub struct PlaywrightBrowserDriver {
    session: Mutex<Option<ChildSession>>,
    session_epoch: AtomicU64,
}

impl Default for PlaywrightBrowserDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaywrightBrowserDriver {
    pub fn new() -> Self {
        Self { session: Mutex::new(None), session_epoch: AtomicU64::new(0) }
    }

    async fn spawn_session(&self) -> Result<ChildSession> {
        if render_disabled() {
            return Err(Error::Generic("browser rendering disabled (WEBPIPE_RENDER_DISABLE)".to_string()));
        }
        let mut child = tokio::process::Command::new(node_binary())
            .arg("-e")
            .arg(NODE_DRIVER_SCRIPT)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Generic(format!("failed to spawn node driver: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| Error::Generic("missing child stdin".to_string()))?;
        let stdout = BufReader::new(child.stdout.take().ok_or_else(|| Error::Generic("missing child stdout".to_string()))?);
        Ok(ChildSession { child, stdin, stdout })
    }

}

fn select_by_fields(by: &SelectBy) -> (Option<&str>, Option<&str>, Option<usize>) {
    match by {
        SelectBy::Value(v) => (Some(v.as_str()), None, None),
        SelectBy::Label(l) => (None, Some(l.as_str()), None),
        SelectBy::Index(i) => (None, None, Some(*i)),
    }
}

#[async_trait::async_trait]
impl BrowserDriver for PlaywrightBrowserDriver {
    async fn start(&self, start_url: Option<&str>, headless: bool, timeout_ms: u64) -> Result<String> {
        let mut guard = self.session.lock().await;
        if let Some(mut old) = guard.take() {
            let _ = send_and_recv(&mut old, json!({"op": "close"}), 2_000).await;
            let _ = old.child.start_kill();
        }
        let mut session = self.spawn_session().await?;
        let resp = send_and_recv(
            &mut session,
            json!({"op": "start", "startUrl": start_url, "headless": headless, "timeoutMs": timeout_ms}),
            timeout_ms,
        )
        .await?;
        *guard = Some(session);
        self.session_epoch.fetch_add(1, Ordering::Relaxed);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn open(&self, url: &str, timeout_ms: u64) -> Result<String> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(session, json!({"op": "open", "url": url, "timeoutMs": timeout_ms}), timeout_ms).await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn click(&self, selector: &str, wait_for_navigation: bool, timeout_ms: u64) -> Result<String> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(
            session,
            json!({"op": "click", "selector": selector, "waitForNavigation": wait_for_navigation, "timeoutMs": timeout_ms}),
            timeout_ms,
        )
        .await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn type_text(&self, selector: &str, text: &str, append: bool, press_enter: bool, timeout_ms: u64) -> Result<String> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(
            session,
            json!({"op": "type", "selector": selector, "text": text, "append": append, "pressEnter": press_enter, "timeoutMs": timeout_ms}),
            timeout_ms,
        )
        .await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn select(&self, selector: &str, by: SelectBy, timeout_ms: u64) -> Result<String> {
        let (value, label, index) = select_by_fields(&by);
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(
            session,
            json!({"op": "select", "selector": selector, "value": value, "label": label, "index": index, "timeoutMs": timeout_ms}),
            timeout_ms,
        )
        .await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn scroll(&self, mode: ScrollMode, x: f64, y: f64) -> Result<(f64, f64)> {
        let mode_str = match mode {
            ScrollMode::By => "by",
            ScrollMode::To => "to",
        };
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(session, json!({"op": "scroll", "mode": mode_str, "x": x, "y": y}), 15_000).await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            let rx = resp.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let ry = resp.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok((rx, ry))
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<String> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(session, json!({"op": "waitFor", "selector": selector, "timeoutMs": timeout_ms}), timeout_ms).await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn snapshot(&self, include_html: bool, max_text_chars: usize) -> Result<BrowserSnapshot> {
        let max_text_chars = max_text_chars.clamp(500, 500_000);
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NoSession)?;
        let resp = send_and_recv(
            session,
            json!({"op": "snapshot", "includeHtml": include_html, "maxTextChars": max_text_chars}),
            15_000,
        )
        .await?;
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            let url = resp.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let title = resp.get("title").and_then(|v| v.as_str()).map(String::from);
            let mut text = resp.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            if text.chars().count() > max_text_chars {
                text = text.chars().take(max_text_chars).collect();
            }
            let html = resp.get("html").and_then(|v| v.as_str()).map(String::from);
            Ok(BrowserSnapshot { url, title, text, html })
        } else {
            Err(translate_error_response(&resp))
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            // Idempotent: no session is a no-op, not an error.
            return Ok(());
        };
        let _ = send_and_recv(&mut session, json!({"op": "close"}), 5_000).await;
        let _ = session.child.start_kill();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_by_fields_maps_variants() {
        assert_eq!(select_by_fields(&SelectBy::Value("x".to_string())).0, Some("x"));
        assert_eq!(select_by_fields(&SelectBy::Label("y".to_string())).1, Some("y"));
        assert_eq!(select_by_fields(&SelectBy::Index(3)).2, Some(3));
    }

    #[test]
    fn translate_error_response_maps_no_session() {
        let v = json!({"ok": false, "error": "NoSession"});
        assert!(matches!(translate_error_response(&v), Error::NoSession));
    }

    #[tokio::test]
    async fn close_without_start_is_a_no_op() {
        let driver = PlaywrightBrowserDriver::new();
        assert!(driver.close().await.is_ok());
        assert!(driver.close().await.is_ok());
    }

    #[tokio::test]
    async fn operations_before_start_fail_with_no_session() {
        let driver = PlaywrightBrowserDriver::new();
        let err = driver.open("https://example.com", 1000).await.unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    // WEBPIPE_NODE_PATH is process-global; serialize tests that set it.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// A fake "node" binary that speaks the driver's newline-delimited JSON
    /// protocol well enough to exercise `start`/`close` without a real
    /// Playwright install.
    #[cfg(unix)]
    fn write_fake_node_driver(dir: &tempfile::TempDir) -> std::path::PathBuf {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let script = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    *'"op":"close"'*) echo '{"ok":true}' ;;
    *) echo '{"ok":true,"url":"http://fixture.invalid/"}' ;;
  esac
done
"#;
        let path = dir.path().join("fake-node.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(script.as_bytes()).unwrap();
        let mut perms = f.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_and_close_round_trip_through_the_driver_protocol() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let fake_node = write_fake_node_driver(&dir);
        std::env::set_var("WEBPIPE_NODE_PATH", &fake_node);

        let driver = PlaywrightBrowserDriver::new();
        let url = driver.start(Some("https://example.com"), true, 5_000).await.unwrap();
        assert_eq!(url, "http://fixture.invalid/");
        assert!(driver.close().await.is_ok());

        std::env::remove_var("WEBPIPE_NODE_PATH");
    }
}
