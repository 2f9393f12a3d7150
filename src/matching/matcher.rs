//! Fuzzy terminal ↔ session matching with confidence scoring.
//!
//! For every open terminal window the matcher scores each known session
//! on title evidence (project folder name, path components), session
//! recency, liveness, and uniqueness, then picks the best candidate
//! above a confidence threshold. User-confirmed mappings overlay the
//! algorithmic result and always win at confidence 100.
//!
//! A session is only ever a candidate when the window title carries some
//! textual evidence for it; recency and liveness sweeten a candidate but
//! cannot conjure one, so a freshly active session does not attach
//! itself to every idle shell on screen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::MatchWeights;
use crate::matching::confirmed::ConfirmedMappings;
use crate::matching::windows::{TerminalInfo, WindowSource};
use crate::sessions::cache::SessionCache;
use crate::sessions::scan::Session;

/// Path components too generic to count as title evidence.
const NOISE_COMPONENTS: &[&str] = &["users", "home", "var", "opt", "mnt", "tmp", "src"];

/// The matcher's verdict for one terminal window.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub terminal: TerminalInfo,
    pub session: Option<Session>,
    /// 0–100 certainty that the terminal hosts the session.
    pub confidence: u8,
    /// `"title-match"`, `"user-confirmed"`, or `"none"`.
    pub match_method: &'static str,
    /// Human-readable signal breakdown.
    pub details: String,
}

/// Result of one full matching pass.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub matches: Vec<Match>,
    pub timestamp: DateTime<Utc>,
    pub confirmed_count: usize,
}

/// Scores candidate (terminal, session) pairs and caches the summary.
pub struct FuzzyMatcher {
    windows: Arc<dyn WindowSource>,
    sessions: Arc<SessionCache>,
    confirmed: Arc<ConfirmedMappings>,
    weights: MatchWeights,
    min_confidence: u8,
    stale_after: Duration,
    cached: RwLock<Option<(MatchSummary, Instant)>>,
}

impl FuzzyMatcher {
    pub fn new(
        windows: Arc<dyn WindowSource>,
        sessions: Arc<SessionCache>,
        confirmed: Arc<ConfirmedMappings>,
        weights: MatchWeights,
        min_confidence: u8,
        stale_after: Duration,
    ) -> Self {
        Self {
            windows,
            sessions,
            confirmed,
            weights,
            min_confidence,
            stale_after,
            cached: RwLock::new(None),
        }
    }

    /// The confirmed-mapping store behind this matcher.
    pub fn confirmed(&self) -> &ConfirmedMappings {
        &self.confirmed
    }

    /// Return the cached summary unless it is stale or `fresh` is set.
    pub async fn match_route(&self, fresh: bool) -> MatchSummary {
        if !fresh {
            let cached = self.cached.read().await;
            if let Some((summary, at)) = cached.as_ref() {
                if at.elapsed() < self.stale_after {
                    return summary.clone();
                }
            }
        }
        self.scan().await
    }

    /// Enumerate windows and produce a fresh summary.
    ///
    /// Window enumeration failures degrade to an empty terminal list so
    /// an unresponsive OS automation call cannot stall the pipeline.
    pub async fn scan(&self) -> MatchSummary {
        let terminals = match self.windows.list_terminals().await {
            Ok(terminals) => terminals,
            Err(e) => {
                tracing::warn!(error = %e, "Window enumeration failed, matching nothing");
                Vec::new()
            }
        };

        let summary = self.fuzzy_match_terminals(&terminals).await;
        *self.cached.write().await = Some((summary.clone(), Instant::now()));
        summary
    }

    /// Score the given terminals against the current session set.
    pub async fn fuzzy_match_terminals(&self, terminals: &[TerminalInfo]) -> MatchSummary {
        let sessions = match self.sessions.get_sessions(false).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, matching without sessions");
                Vec::new()
            }
        };

        // First pass: textual evidence per (terminal, session) pair, and
        // how many terminals show evidence for each session. A session
        // claimed by a single terminal gets the uniqueness bonus.
        let mut evidence: Vec<Vec<Option<(u16, Vec<String>)>>> = Vec::with_capacity(terminals.len());
        let mut claimants: HashMap<&str, usize> = HashMap::new();
        for terminal in terminals {
            let title = terminal.window_title.to_lowercase();
            let row: Vec<Option<(u16, Vec<String>)>> = sessions
                .iter()
                .map(|session| {
                    let signal = title_evidence(&title, session, &self.weights);
                    if signal.is_some() {
                        *claimants.entry(session.id.as_str()).or_default() += 1;
                    }
                    signal
                })
                .collect();
            evidence.push(row);
        }

        let now = Utc::now();
        let mut matches = Vec::with_capacity(terminals.len());
        for (terminal, row) in terminals.iter().zip(evidence) {
            let best = row
                .into_iter()
                .zip(&sessions)
                .filter_map(|(signal, session)| {
                    let (mut score, mut details) = signal?;

                    let age = (now - session.last_seen)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    let recency = recency_bonus(age, &self.weights);
                    if recency > 0 {
                        score += recency;
                        details.push(format!("recent activity (+{recency})"));
                    }
                    if session.is_live {
                        score += self.weights.live_bonus as u16;
                        details.push(format!("live transcript (+{})", self.weights.live_bonus));
                    }
                    if claimants.get(session.id.as_str()) == Some(&1) {
                        score += self.weights.uniqueness_bonus as u16;
                        details.push(format!(
                            "unique candidate (+{})",
                            self.weights.uniqueness_bonus
                        ));
                    }
                    Some((score, details, session))
                })
                .max_by_key(|(score, _, _)| *score);

            matches.push(match best {
                Some((score, details, session)) if score >= self.min_confidence as u16 => Match {
                    terminal: terminal.clone(),
                    session: Some(session.clone()),
                    confidence: score.min(100) as u8,
                    match_method: "title-match",
                    details: details.join(", "),
                },
                Some((score, _, _)) => Match {
                    terminal: terminal.clone(),
                    session: None,
                    confidence: score.min(100) as u8,
                    match_method: "none",
                    details: format!(
                        "best candidate scored {score}, below threshold {}",
                        self.min_confidence
                    ),
                },
                None => Match {
                    terminal: terminal.clone(),
                    session: None,
                    confidence: 0,
                    match_method: "none",
                    details: "no title evidence for any session".to_string(),
                },
            });
        }

        // Confirmed mappings override whatever the scorer said.
        for entry in &mut matches {
            let fingerprint = entry.terminal.fingerprint();
            if let Some(session_id) = self.confirmed.get(&fingerprint).await {
                entry.session = sessions.iter().find(|s| s.id == session_id).cloned();
                entry.confidence = 100;
                entry.match_method = "user-confirmed";
                entry.details = format!("confirmed mapping to session {session_id}");
            }
        }

        MatchSummary {
            matches,
            timestamp: now,
            confirmed_count: self.confirmed.count().await,
        }
    }
}

/// Textual evidence for a session in a lowercased window title.
///
/// `None` when the title says nothing about the session; recency and
/// liveness alone never make a candidate.
fn title_evidence(
    title: &str,
    session: &Session,
    weights: &MatchWeights,
) -> Option<(u16, Vec<String>)> {
    let mut score: u16 = 0;
    let mut details = Vec::new();

    let components: Vec<&str> = session
        .project_path
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();
    let project_name = components.last().copied().unwrap_or(&session.folder_name);

    if project_name.len() >= 2 && title.contains(&project_name.to_lowercase()) {
        score += weights.folder_name_hit as u16;
        details.push(format!(
            "folder name '{project_name}' in title (+{})",
            weights.folder_name_hit
        ));
    }

    let mut component_score: u16 = 0;
    let mut component_hits = 0usize;
    for component in components.iter().take(components.len().saturating_sub(1)) {
        let lower = component.to_lowercase();
        if lower.len() >= 3 && !NOISE_COMPONENTS.contains(&lower.as_str()) && title.contains(&lower)
        {
            component_score =
                (component_score + weights.path_component_hit as u16).min(weights.path_component_cap as u16);
            component_hits += 1;
        }
    }
    if component_hits > 0 {
        score += component_score;
        details.push(format!(
            "{component_hits} path component(s) in title (+{component_score})"
        ));
    }

    (score > 0).then_some((score, details))
}

/// Linear decay from `recency_max` to zero over the horizon.
fn recency_bonus(age: Duration, weights: &MatchWeights) -> u16 {
    if age >= weights.recency_horizon {
        return 0;
    }
    let remaining = 1.0 - age.as_secs_f64() / weights.recency_horizon.as_secs_f64();
    (weights.recency_max as f64 * remaining).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::windows::StaticWindows;

    struct Fixture {
        matcher: FuzzyMatcher,
        _dir: tempfile::TempDir,
    }

    /// Two freshly written projects on disk: `/Users/sam/notes` and
    /// `/Users/sam/backend`.
    async fn fixture(windows: Vec<TerminalInfo>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (folder, id) in [("-Users-sam-notes", "sess-notes"), ("-Users-sam-backend", "sess-backend")] {
            let path = dir.path().join(folder);
            tokio::fs::create_dir_all(&path).await.unwrap();
            tokio::fs::write(path.join(format!("{id}.jsonl")), "{}\n")
                .await
                .unwrap();
        }

        let sessions = Arc::new(SessionCache::new(
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        ));
        let confirmed = Arc::new(
            ConfirmedMappings::load(dir.path().join("confirmed.json"))
                .await
                .unwrap(),
        );

        Fixture {
            matcher: FuzzyMatcher::new(
                Arc::new(StaticWindows(windows)),
                sessions,
                confirmed,
                MatchWeights::default(),
                40,
                Duration::from_secs(60),
            ),
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_folder_name_in_title_matches() {
        let fx = fixture(vec![TerminalInfo::new("kitty", "notes — vim")]).await;
        let summary = fx.matcher.scan().await;

        let m = &summary.matches[0];
        assert_eq!(m.match_method, "title-match");
        assert_eq!(m.session.as_ref().unwrap().id, "sess-notes");
        assert!(m.confidence >= 40);
    }

    #[tokio::test]
    async fn test_unrelated_title_is_unmatched() {
        let fx = fixture(vec![TerminalInfo::new("kitty", "htop")]).await;
        let summary = fx.matcher.scan().await;

        let m = &summary.matches[0];
        assert_eq!(m.match_method, "none");
        assert!(m.session.is_none());
        assert_eq!(m.confidence, 0);
    }

    #[tokio::test]
    async fn test_recency_alone_never_matches() {
        // Both sessions are recent and one is live, but the title names
        // neither project.
        let fx = fixture(vec![TerminalInfo::new("kitty", "~ — zsh")]).await;
        let summary = fx.matcher.scan().await;
        assert!(summary.matches[0].session.is_none());
    }

    #[tokio::test]
    async fn test_uniqueness_bonus_rewards_sole_claimant() {
        let shared = fixture(vec![
            TerminalInfo::new("kitty", "notes a"),
            TerminalInfo::new("kitty", "notes b"),
        ])
        .await;
        let sole = fixture(vec![
            TerminalInfo::new("kitty", "notes a"),
            TerminalInfo::new("kitty", "backend b"),
        ])
        .await;

        let shared_conf = shared.matcher.scan().await.matches[0].confidence;
        let sole_conf = sole.matcher.scan().await.matches[0].confidence;
        assert!(
            sole_conf > shared_conf,
            "sole claimant {sole_conf} should beat shared {shared_conf}"
        );
    }

    #[tokio::test]
    async fn test_confirmed_mapping_overrides_scorer() {
        let fx = fixture(vec![TerminalInfo::new("kitty", "notes — vim")]).await;

        // The scorer would say sess-notes; the user insists otherwise.
        fx.matcher
            .confirmed
            .confirm("kitty|notes — vim".to_string(), "sess-backend".to_string())
            .await
            .unwrap();

        let summary = fx.matcher.scan().await;
        let m = &summary.matches[0];
        assert_eq!(m.match_method, "user-confirmed");
        assert_eq!(m.confidence, 100);
        assert_eq!(m.session.as_ref().unwrap().id, "sess-backend");
        assert_eq!(summary.confirmed_count, 1);
    }

    #[tokio::test]
    async fn test_confirmed_mapping_applies_to_unmatched_terminal() {
        let fx = fixture(vec![TerminalInfo::new("kitty", "htop")]).await;
        fx.matcher
            .confirmed
            .confirm("kitty|htop".to_string(), "sess-notes".to_string())
            .await
            .unwrap();

        let summary = fx.matcher.scan().await;
        let m = &summary.matches[0];
        assert_eq!(m.confidence, 100);
        assert_eq!(m.session.as_ref().unwrap().id, "sess-notes");
    }

    #[tokio::test]
    async fn test_match_route_serves_cached_until_stale_or_fresh() {
        let fx = fixture(vec![TerminalInfo::new("kitty", "notes")]).await;

        let first = fx.matcher.match_route(false).await;
        let second = fx.matcher.match_route(false).await;
        assert_eq!(first.timestamp, second.timestamp, "cached summary reused");

        let forced = fx.matcher.match_route(true).await;
        assert!(forced.timestamp >= first.timestamp);
    }
}
