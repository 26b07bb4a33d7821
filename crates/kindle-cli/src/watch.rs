//! `kindle watch`: follow a running dashboard feed from the terminal.

use anyhow::{Context, Result, anyhow};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use kindle_core::TickEvent;

/// One line per event: tick, mechanism, and the headline numbers.
pub fn format_event(event: &TickEvent) -> String {
    let s = &event.summary;
    let mut line = format!(
        "tick {:>6}  {:<11} rho={:.3} target={:.2} energy={:.3} active={}",
        event.tick,
        event.detail.mechanism(),
        s.rho,
        s.rho_target,
        s.total_energy,
        s.active_nodes,
    );
    if let Some(c) = s.coherence {
        line.push_str(&format!(" C={c:.2}"));
    }
    if let Some(mode) = &s.mode {
        line.push_str(&format!(" mode={mode}"));
    }
    if let Some(context) = &s.context {
        line.push_str(&format!(" context={}", context.as_str()));
    }
    line
}

/// Stream events from `base_url` into `on_event` until the feed closes or
/// `limit` events have been seen. Returns how many were seen.
pub async fn follow(
    base_url: &str,
    limit: Option<usize>,
    mut on_event: impl FnMut(&TickEvent),
) -> Result<usize> {
    let url = format!("{}/api/stream", base_url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?
        .error_for_status()
        .with_context(|| format!("feed at {url} refused the stream"))?;

    let mut events = response.bytes_stream().eventsource();
    let mut seen = 0;
    while let Some(item) = events.next().await {
        let message = item.map_err(|e| anyhow!("feed stream error: {e}"))?;
        match serde_json::from_str::<TickEvent>(&message.data) {
            Ok(event) => {
                on_event(&event);
                seen += 1;
            }
            Err(e) => tracing::warn!("skipping unreadable feed message: {e}"),
        }
        if limit.is_some_and(|max| seen >= max) {
            break;
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::*;
    use crate::http;
    use crate::runtime::Runtime;
    use kindle_core::{EngineConfig, MemoryGraph, Node, Stimulus};
    use kindle_store::Instance;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_format_event_line() {
        let mut g = MemoryGraph::new();
        g.add_node(Node::new("a", "memory"));
        let mut engine = kindle_core::Engine::new(EngineConfig::default()).unwrap();
        let report = engine
            .tick(&mut g, &[Stimulus::single("a", 0.5)], None)
            .unwrap();
        let line = format_event(&report.events[0]);
        assert!(line.starts_with("tick      1  injection"), "got {line}");
        assert!(line.contains("rho="));
        assert!(!line.contains("mode="));
    }

    #[tokio::test]
    async fn test_follow_receives_live_events() {
        let instance = Instance::open_in_memory().unwrap();
        let mut g = MemoryGraph::new();
        g.add_node(Node::new("a", "memory"));
        instance.store().save_graph(&g).unwrap();
        let rt = Runtime::new(instance).unwrap().shared();

        let listener = http::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let token = CancellationToken::new();
        let server = tokio::spawn(http::serve(listener, rt.clone(), token.clone()));
        let ticker = http::spawn_ticker(rt.clone(), Duration::from_millis(20), token.clone());

        let mut ticks = Vec::new();
        let seen = tokio::time::timeout(
            Duration::from_secs(5),
            follow(&base, Some(3), |e| ticks.push(e.tick)),
        )
        .await
        .expect("feed should deliver events")
        .unwrap();

        assert_eq!(seen, 3);
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));

        token.cancel();
        ticker.await.unwrap();
        server.await.unwrap().unwrap();
    }
}
