//! Cadenza: adaptive, context-aware music recommendation core.
//!
//! Cadenza is the recommendation-serving subsystem of a multi-turn
//! conversational music assistant. It keeps per-session conversational
//! and emotional state, scores a song catalog against that state with a
//! multi-factor model whose emphasis is picked by a Thompson-Sampling
//! bandit, learns per-user feature weights from feedback, and degrades
//! to cold-start strategies while a user's history is thin.
//!
//! # Architecture
//!
//! Independent stores collaborate under a single facade:
//! - **Conversation context memory**: sliding window of turns per session
//! - **Emotional trajectory**: per-user valence–arousal series with trend
//!   classification
//! - **Session reward**: composite engagement/satisfaction/emotional
//!   reward that feeds the bandit
//! - **Weight adapter**: per-user feature weights with gradient-style
//!   updates behind a persistence seam
//! - **Scoring engine**: multi-factor candidate scoring with strategy
//!   selection and explanations
//! - **Cold start**: popularity / mood-cluster / hybrid fallbacks with a
//!   blending transition
//!
//! The stores never reference each other; the [`facade::Facade`] threads
//! values between them and is the only entry point external callers use.

pub mod bandit;
pub mod catalog;
pub mod coldstart;
pub mod config;
pub mod context;
pub mod emotion;
pub mod error;
pub mod facade;
pub mod reward;
pub mod scoring;
pub mod trajectory;
pub mod weights;

pub use bandit::{Strategy, ThompsonBandit};
pub use catalog::{CatalogAdapter, CatalogSong, StaticCatalog};
pub use coldstart::{ColdStartHandler, InMemoryFeedbackLog, TransitionManager};
pub use config::CoreConfig;
pub use context::ConversationContext;
pub use error::{CoreError, Result};
pub use facade::{Facade, Registry};
pub use reward::{Feedback, SessionReward};
pub use scoring::ScoringEngine;
pub use trajectory::TrajectoryTracker;
pub use weights::{InMemoryWeightStore, SqliteWeightStore, WeightAdapter, WeightStore};
