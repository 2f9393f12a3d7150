//! Terminal-window ↔ work-session matching.
//!
//! The matcher correlates ambient terminal windows with known sessions
//! so the bridge can route "the session in this window" requests.
//! Algorithmic scores come from [`matcher`]; durable user overrides live
//! in [`confirmed`]; window enumeration hides behind the
//! [`windows::WindowSource`] trait so tests never shell out.

pub mod confirmed;
pub mod matcher;
pub mod windows;

pub use confirmed::ConfirmedMappings;
pub use matcher::{FuzzyMatcher, Match, MatchSummary};
pub use windows::{StaticWindows, SystemWindowSource, TerminalInfo, WindowSource};
