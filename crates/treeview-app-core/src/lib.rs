// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Application services for tree views (config persistence, view registry,
//! formula evaluation). Keeps HTTP and storage adapters thin.

pub mod config;
pub mod formula;
pub mod views;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use formula::PathEvaluator;
pub use views::{SavedView, ViewConfigService, ViewRegistry};
