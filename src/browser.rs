use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One rendered list entry: its position on the page and its flattened text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub index: usize,
    pub text: String,
}

/// Whatever renders the page for the crawler.
///
/// Every call that touches navigation state takes `&mut self`, so a session
/// can only ever serve one run at a time.
#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Current `document.body.scrollHeight`.
    async fn scroll_height(&mut self) -> Result<i64>;

    async fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Every element matching a CSS selector, in document order.
    async fn find_all(&mut self, selector: &str) -> Result<Vec<RawRow>>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    /// False once the underlying browser connection is gone.
    fn is_alive(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// A local Chrome driven over the DevTools protocol.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    pub async fn launch(headless: bool) -> Result<Self> {
        let mut builder = BrowserConfig::builder().window_size(1280, 1024);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser config: {}", e))?;

        info!("Opening browser (headless: {})", headless);
        let (browser, mut events) = Browser::launch(config)
            .await
            .context("Failed to launch Chrome")?;

        // The CDP connection only makes progress while this stream is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
            warn!("Browser connection closed");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open a browser tab")?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    async fn scroll_height(&mut self) -> Result<i64> {
        let height = self
            .page
            .evaluate("document.body.scrollHeight")
            .await?
            .into_value::<i64>()?;
        Ok(height)
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await?;
        Ok(())
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<RawRow>> {
        let elements = self.page.find_elements(selector).await?;
        let mut rows = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            let text = element.inner_text().await?.unwrap_or_default();
            rows.push(RawRow { index, text });
        }
        Ok(rows)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing browser");
        self.browser.close().await?;
        self.browser.wait().await?;
        self.handler.abort();
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted session for pipeline tests.
    #[derive(Default)]
    pub struct FakeSession {
        /// Successive `scroll_height` answers; the last one repeats.
        pub heights: VecDeque<i64>,
        /// Row texts the list marker resolves to.
        pub rows: Vec<String>,
        /// `find_all` stays empty for this many calls before rows appear.
        pub rows_hidden_for: usize,
        pub fail_navigation: bool,
        pub fail_screenshot: bool,
        pub dead: bool,

        pub visited: Vec<String>,
        pub scrolls: usize,
        pub measurements: usize,
    }

    impl FakeSession {
        pub fn with_rows(rows: &[&str]) -> Self {
            Self {
                heights: VecDeque::from([1000]),
                rows: rows.iter().map(|r| r.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            if self.fail_navigation {
                return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED"));
            }
            self.visited.push(url.to_string());
            Ok(())
        }

        async fn scroll_height(&mut self) -> Result<i64> {
            self.measurements += 1;
            let height = if self.heights.len() > 1 {
                self.heights.pop_front()
            } else {
                self.heights.front().copied()
            };
            height.ok_or_else(|| anyhow!("no scroll heights scripted"))
        }

        async fn scroll_to_bottom(&mut self) -> Result<()> {
            self.scrolls += 1;
            Ok(())
        }

        async fn find_all(&mut self, _selector: &str) -> Result<Vec<RawRow>> {
            if self.rows_hidden_for > 0 {
                self.rows_hidden_for -= 1;
                return Ok(Vec::new());
            }
            Ok(self
                .rows
                .iter()
                .enumerate()
                .map(|(index, text)| RawRow {
                    index,
                    text: text.clone(),
                })
                .collect())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>> {
            if self.fail_screenshot {
                return Err(anyhow!("Page.captureScreenshot timed out"));
            }
            Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
        }

        fn is_alive(&self) -> bool {
            !self.dead
        }

        async fn close(&mut self) -> Result<()> {
            self.dead = true;
            Ok(())
        }
    }
}
