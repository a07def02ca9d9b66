//! waltest-core
//!
//! Building blocks for a harness that reproduces concurrency hazards of a
//! WAL-backed store driven from a fixed-size worker pool.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, row, spec, errors）
//! - **ports**: 抽象化レイヤー（Store, StoreConnection, Clock）
//! - **impls**: 実装（MemoryStore, SqliteStore）
//! - **pool**: 固定サイズのワーカープール、TaskHandle、wait-for グラフ
//! - **app**: builder, orchestrator, scenarios, transaction scope, result delivery
//! - **config**: TOML 設定
//! - **observability**: status views

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod pool;
pub mod ports;
