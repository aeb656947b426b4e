use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::{RawRow, Session};

pub const SETTLE_INTERVAL: Duration = Duration::from_secs(2);
pub const MARKER_TIMEOUT: Duration = Duration::from_secs(10);
const MARKER_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no element matching `{selector}` appeared within {timeout:?}")]
    Timeout { selector: String, timeout: Duration },
    #[error("browser session error: {0:#}")]
    Session(#[from] anyhow::Error),
}

/// Drives an infinite-scroll page until it stops growing, then collects rows.
#[derive(Debug, Clone)]
pub struct PageLoader {
    pub selector: String,
    pub settle: Duration,
    pub marker_timeout: Duration,
}

impl PageLoader {
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            settle: SETTLE_INTERVAL,
            marker_timeout: MARKER_TIMEOUT,
        }
    }

    pub async fn load<S: Session + ?Sized>(
        &self,
        session: &mut S,
        url: &str,
    ) -> Result<Vec<RawRow>, LoadError> {
        info!("Loading {}", url);
        session.navigate(url).await?;

        let scrolls = self.scroll_until_stable(session).await?;
        debug!("Page height stable after {} scrolls", scrolls);

        let rows = self.wait_for_rows(session).await?;
        info!("Found {} rows", rows.len());
        Ok(rows)
    }

    /// Scroll to the bottom until two consecutive height readings agree.
    /// Returns the number of scroll actions performed.
    async fn scroll_until_stable<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<usize, LoadError> {
        let mut last_height = session.scroll_height().await?;
        let mut scrolls = 0;
        loop {
            session.scroll_to_bottom().await?;
            scrolls += 1;
            sleep(self.settle).await;

            let height = session.scroll_height().await?;
            if height == last_height {
                return Ok(scrolls);
            }
            debug!("Page grew {} -> {}", last_height, height);
            last_height = height;
        }
    }

    async fn wait_for_rows<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<Vec<RawRow>, LoadError> {
        let deadline = Instant::now() + self.marker_timeout;
        loop {
            let rows = session.find_all(&self.selector).await?;
            if !rows.is_empty() {
                return Ok(rows);
            }
            if Instant::now() >= deadline {
                return Err(LoadError::Timeout {
                    selector: self.selector.clone(),
                    timeout: self.marker_timeout,
                });
            }
            sleep(MARKER_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::browser::testing::FakeSession;

    const URL: &str = "https://example.test/chart";

    #[tokio::test(start_paused = true)]
    async fn stops_scrolling_once_height_repeats() {
        let mut session = FakeSession::with_rows(&["1. A\n2000\n1h\nPG\n8.0"]);
        session.heights = VecDeque::from([1000, 2000, 2000]);

        let loader = PageLoader::new(".row");
        let rows = loader.load(&mut session, URL).await.unwrap();

        assert_eq!(session.scrolls, 2);
        assert_eq!(session.measurements, 3);
        assert_eq!(rows.len(), 1);
        assert_eq!(session.visited, vec![URL.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn static_page_scrolls_once() {
        let mut session = FakeSession::with_rows(&["x"]);
        let loader = PageLoader::new(".row");
        loader.load(&mut session, URL).await.unwrap();
        assert_eq!(session.scrolls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_rows() {
        let mut session = FakeSession::with_rows(&["a", "b"]);
        session.rows_hidden_for = 3;

        let rows = PageLoader::new(".row").load(&mut session, URL).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_marker_times_out() {
        let mut session = FakeSession::with_rows(&[]);
        let started = Instant::now();

        let err = PageLoader::new(".row")
            .load(&mut session, URL)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Timeout { .. }));
        assert!(started.elapsed() >= MARKER_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_is_a_session_error() {
        let mut session = FakeSession::with_rows(&["a"]);
        session.fail_navigation = true;

        let err = PageLoader::new(".row")
            .load(&mut session, URL)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Session(_)));
        assert_eq!(session.scrolls, 0);
    }
}
