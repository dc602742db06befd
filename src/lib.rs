//! ArcScript – the execution core of a small query language over a versioned
//! object store.
//!
//! An ArcScript is an ordered list of instructions:
//! * `index` (re)indexes the entries of some schemas and types.
//! * `select` filters the indexed entries with a condition, optionally
//!   projecting columns, ordering the rows and limiting how many are kept.
//! * `update` is recognized but not supported.
//!
//! Conditions are folded strictly left to right, so there is no precedence
//! between `AND` and `OR`: `a OR b AND c` means `(a OR b) AND c`.
//!
//! ## Modules
//! * [`storage`] – The boundary to the store: entries, the index and examiner
//!   traits, and an in-memory reference storage.
//! * [`discovery`] – What a dotted property path resolves to on an object.
//! * [`cache`] – The per-run lookup cache in front of the examiner.
//! * [`script`] and [`predicate`] – The compiled script model.
//! * [`evaluator`] – Condition evaluation against entries, values and rows.
//! * [`concurrent`] – One task per entry, admission-gated.
//! * [`planner`] – Implicit index insertion.
//! * [`engine`] – Runs a planned script and reports an [`result::ArcScriptResult`].
//! * [`pipeline`] – Scan, filter, projection and sort stages over row streams.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use arcscript::{engine::Engine, predicate::Predicate, storage::MemoryStorage};
//! use arcscript::script::{ArcScript, Assertion, Condition, QueryInstruction};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let storage = Arc::new(MemoryStorage::new());
//! storage.add("crm/customer/1", "crm", "Customer", json!({"name": "Ann"}));
//! storage.add("crm/customer/2", "crm", "Customer", json!({"name": "Bob"}));
//! let script = ArcScript::new().query(
//!     QueryInstruction::new(["crm"]).filter(Condition::of(Assertion::new("name", Predicate::Is(json!("Ann"))))),
//! );
//! let result = Engine::default().execute(script, &storage.instance()).await;
//! assert_eq!(result.result_sets().next().unwrap().len(), 1);
//! # });
//! ```

pub mod cache;
pub mod concurrent;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod pipeline;
pub mod planner;
pub mod predicate;
pub mod result;
pub mod script;
pub mod storage;

pub use engine::Engine;
pub use error::{ArcScriptError, Result};
pub use result::ArcScriptResult;
pub use script::ArcScript;
